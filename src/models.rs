use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::statement::Statement;

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub id: i64,
    pub name: String,
    pub contextid: i64,
    pub timecreated: i64,
    pub timemodified: i64,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub id: i64,
    pub h5pactivityid: i64,
    pub userid: i64,
    pub attempt: i64,
    pub rawscore: i64,
    pub maxscore: i64,
    pub timecreated: i64,
    pub timemodified: i64,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttemptResultRecord {
    pub id: i64,
    pub attemptid: i64,
    pub subcontent: String,
    pub timecreated: i64,
    pub interactiontype: String,
    pub description: String,
    pub correctpattern: String,
    pub response: String,
    pub additionals: String,
    pub rawscore: i64,
    pub maxscore: i64,
}

#[skip_serializing_none]
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContentRecord {
    pub id: i64,
    pub name: String,
    pub contenttype: String,
    pub contextid: i64,
    pub instanceid: Option<i64>,
    pub configdata: String,
    pub usercreated: i64,
    pub usermodified: i64,
    pub timecreated: i64,
    pub timemodified: i64,
}

/// Optional initial values for a new content record.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NewContent {
    pub name: Option<String>,
    pub usercreated: Option<i64>,
    pub configdata: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateActivityReq {
    pub name: String,
    pub parent_contextid: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UserFilter {
    pub userid: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ContextQuery {
    pub contextid: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatementReq {
    pub statement: Statement,
    #[serde(default)]
    pub subcontent: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateContentReq {
    pub instanceid: Option<i64>,
    pub configdata: Option<String>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContentView {
    #[serde(flatten)]
    pub record: ContentRecord,
    pub fileurl: Option<String>,
}
