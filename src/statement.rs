//! xAPI statement model and the mapping from a statement to an attempt result row.
//!
//! Only the parts of a statement that tracking needs are typed; everything
//! shaped by the content package (choices, extensions, patterns) stays as raw
//! JSON and is carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Statement {
    pub actor: Option<Value>,
    pub verb: Option<Verb>,
    pub object: Option<StatementObject>,
    pub result: Option<StatementResult>,
    pub context: Option<StatementContext>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Verb {
    pub id: String,
    pub display: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StatementObject {
    pub id: Option<String>,
    #[serde(rename = "objectType")]
    pub object_type: Option<String>,
    pub definition: Option<Definition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub interaction_type: Option<String>,
    pub description: Option<Value>,
    pub correct_responses_pattern: Option<Value>,
    pub choices: Option<Value>,
    pub source: Option<Value>,
    pub target: Option<Value>,
    pub scale: Option<Value>,
    pub steps: Option<Value>,
    pub extensions: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StatementResult {
    pub score: Option<Score>,
    pub response: Option<String>,
    pub success: Option<bool>,
    pub completion: Option<bool>,
    pub duration: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Score {
    pub raw: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,
    pub scaled: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StatementContext {
    pub registration: Option<String>,
    pub extensions: Option<Value>,
}

/// When a statement's score is copied onto its attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScorePropagation {
    /// Only non-zero raw scores update the attempt.
    #[default]
    NonZeroOnly,
    /// Every whole-package statement updates the attempt, zero included.
    Always,
}

impl ScorePropagation {
    /// Sub-content statements never touch the attempt aggregate.
    /// `raw` is the score as reported, so 0.4 counts as non-zero.
    pub fn applies(self, subcontent: &str, raw: f64) -> bool {
        if !subcontent.is_empty() {
            return false;
        }
        match self {
            ScorePropagation::NonZeroOnly => raw != 0.0,
            ScorePropagation::Always => true,
        }
    }
}

/// Result row derived from a statement, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResult {
    pub subcontent: String,
    pub interactiontype: String,
    pub description: String,
    pub correctpattern: String,
    pub response: String,
    pub additionals: String,
    pub rawscore: i64,
    pub maxscore: i64,
    /// Raw score before rounding.
    pub raw: f64,
}

impl NewResult {
    /// Maps a statement onto a result row. `None` when the statement lacks an
    /// object, an object definition or a result.
    pub fn from_statement(statement: &Statement, subcontent: &str) -> Option<NewResult> {
        let object = statement.object.as_ref()?;
        let definition = object.definition.as_ref()?;
        let result = statement.result.as_ref()?;
        let context_extensions = statement
            .context
            .as_ref()
            .and_then(|c| c.extensions.as_ref());

        let raw = result.score.as_ref().and_then(|s| s.raw).unwrap_or(0.0);
        let (rawscore, maxscore) = match &result.score {
            Some(score) => (to_points(score.raw), to_points(score.max)),
            None => (0, 0),
        };

        Some(NewResult {
            subcontent: subcontent.to_string(),
            interactiontype: interaction_type(definition).to_string(),
            description: description_from_definition(definition),
            correctpattern: correctpattern_from_definition(definition),
            response: result.response.clone().unwrap_or_default(),
            additionals: additionals(definition, context_extensions),
            rawscore,
            maxscore,
            raw,
        })
    }
}

fn to_points(value: Option<f64>) -> i64 {
    value.map(|v| v.round() as i64).unwrap_or(0)
}

fn interaction_type(definition: &Definition) -> &str {
    definition.interaction_type.as_deref().unwrap_or("other")
}

/// Picks the `en-US` description when present, otherwise the first one in
/// document order.
pub fn description_from_definition(definition: &Definition) -> String {
    match &definition.description {
        Some(Value::Object(translations)) => translations
            .get("en-US")
            .or_else(|| translations.values().next())
            .map(text)
            .unwrap_or_default(),
        Some(Value::Array(items)) => items.first().map(text).unwrap_or_default(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The correct responses pattern as JSON, kept only when it is a list.
pub fn correctpattern_from_definition(definition: &Definition) -> String {
    match &definition.correct_responses_pattern {
        Some(pattern @ Value::Array(_)) => pattern.to_string(),
        _ => String::new(),
    }
}

/// Interaction specific data worth keeping for reports, as JSON.
pub fn additionals(definition: &Definition, context_extensions: Option<&Value>) -> String {
    let mut data = Map::new();
    let carry = |data: &mut Map<String, Value>, key: &str, value: &Option<Value>| {
        data.insert(
            key.to_string(),
            value.clone().unwrap_or_else(|| Value::Array(Vec::new())),
        );
    };

    match interaction_type(definition) {
        "choice" | "sequencing" => carry(&mut data, "choices", &definition.choices),
        "matching" => {
            carry(&mut data, "source", &definition.source);
            carry(&mut data, "target", &definition.target);
        }
        "likert" => carry(&mut data, "scale", &definition.scale),
        "performance" => carry(&mut data, "steps", &definition.steps),
        _ => {}
    }

    data.insert(
        "extensions".into(),
        definition
            .extensions
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );
    data.insert(
        "contextExtensions".into(),
        context_extensions
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );

    if data.is_empty() {
        return String::new();
    }
    Value::Object(data).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(value: Value) -> Definition {
        serde_json::from_value(value).unwrap()
    }

    fn statement(value: Value) -> Statement {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn description_prefers_en_us() {
        let def = definition(json!({
            "description": {"ca": "Pregunta", "en-US": "Question", "es": "Pregunta"}
        }));
        assert_eq!(description_from_definition(&def), "Question");
    }

    #[test]
    fn description_falls_back_to_any_entry() {
        let def = definition(json!({"description": {"ca": "Pregunta"}}));
        assert_eq!(description_from_definition(&def), "Pregunta");

        let def = definition(json!({"description": {"es": "Pregunta", "ca": "Qüestió"}}));
        assert_eq!(description_from_definition(&def), "Pregunta");
    }

    #[test]
    fn description_empty_when_missing() {
        assert_eq!(description_from_definition(&definition(json!({}))), "");
        assert_eq!(
            description_from_definition(&definition(json!({"description": {}}))),
            ""
        );
    }

    #[test]
    fn correct_pattern_only_for_lists() {
        let def = definition(json!({"correctResponsesPattern": ["1", "2[,]3"]}));
        assert_eq!(correctpattern_from_definition(&def), r#"["1","2[,]3"]"#);

        let def = definition(json!({"correctResponsesPattern": "1"}));
        assert_eq!(correctpattern_from_definition(&def), "");

        let def = definition(json!({"correctResponsesPattern": {"a": 1}}));
        assert_eq!(correctpattern_from_definition(&def), "");
    }

    #[test]
    fn additionals_by_interaction_type() {
        let def = definition(json!({
            "interactionType": "choice",
            "choices": [{"id": "0"}, {"id": "1"}]
        }));
        let out: Value = serde_json::from_str(&additionals(&def, None)).unwrap();
        assert_eq!(out["choices"], json!([{"id": "0"}, {"id": "1"}]));
        assert_eq!(out["extensions"], json!({}));
        assert_eq!(out["contextExtensions"], json!({}));

        let def = definition(json!({"interactionType": "matching", "source": [{"id": "a"}]}));
        let out: Value = serde_json::from_str(&additionals(&def, None)).unwrap();
        assert_eq!(out["source"], json!([{"id": "a"}]));
        assert_eq!(out["target"], json!([]));

        let def = definition(json!({"interactionType": "likert", "scale": [{"id": "s"}]}));
        let out: Value = serde_json::from_str(&additionals(&def, None)).unwrap();
        assert_eq!(out["scale"], json!([{"id": "s"}]));
        assert!(out.get("choices").is_none());
    }

    #[test]
    fn additionals_carry_extensions() {
        let def = definition(json!({
            "interactionType": "performance",
            "steps": [{"id": "1"}],
            "extensions": {"http://h5p.org/x-api/line-breaks": [3]}
        }));
        let ctx = json!({"http://h5p.org/x-api/h5p-local-content-id": 1});
        let out: Value = serde_json::from_str(&additionals(&def, Some(&ctx))).unwrap();
        assert_eq!(out["steps"], json!([{"id": "1"}]));
        assert_eq!(out["extensions"]["http://h5p.org/x-api/line-breaks"], json!([3]));
        assert_eq!(out["contextExtensions"], ctx);
    }

    #[test]
    fn rejects_incomplete_statements() {
        let no_result = statement(json!({
            "object": {"id": "x", "definition": {"interactionType": "compound"}}
        }));
        assert!(NewResult::from_statement(&no_result, "").is_none());

        let no_definition = statement(json!({
            "object": {"id": "x"},
            "result": {"score": {"raw": 1, "max": 1}}
        }));
        assert!(NewResult::from_statement(&no_definition, "").is_none());

        let no_object = statement(json!({"result": {"score": {"raw": 1}}}));
        assert!(NewResult::from_statement(&no_object, "").is_none());
    }

    #[test]
    fn maps_complete_statement() {
        let st = statement(json!({
            "actor": {"name": "Student"},
            "verb": {"id": "http://adlnet.gov/expapi/verbs/answered"},
            "object": {
                "id": "http://example.com/h5p/1",
                "definition": {"correctResponsesPattern": ["1"]}
            },
            "result": {"score": {"min": 0, "max": 2, "raw": 1.6, "scaled": 0.8}, "response": "1"}
        }));
        let row = NewResult::from_statement(&st, "111-222").unwrap();
        assert_eq!(row.interactiontype, "other");
        assert_eq!(row.subcontent, "111-222");
        assert_eq!(row.response, "1");
        assert_eq!(row.correctpattern, r#"["1"]"#);
        assert_eq!((row.rawscore, row.maxscore), (2, 2));
    }

    #[test]
    fn missing_score_defaults_to_zero() {
        let st = statement(json!({
            "object": {"definition": {}},
            "result": {"completion": true}
        }));
        let row = NewResult::from_statement(&st, "").unwrap();
        assert_eq!((row.rawscore, row.maxscore), (0, 0));
        assert_eq!(row.response, "");
    }

    #[test]
    fn propagation_policy() {
        assert!(ScorePropagation::NonZeroOnly.applies("", 2.0));
        assert!(ScorePropagation::NonZeroOnly.applies("", 0.4));
        assert!(!ScorePropagation::NonZeroOnly.applies("", 0.0));
        assert!(ScorePropagation::Always.applies("", 0.0));
        assert!(!ScorePropagation::Always.applies("111-222", 3.0));
    }
}
