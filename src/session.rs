use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use axum_extra::{headers, TypedHeader};
use http::{HeaderName, HeaderValue};

static X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

/// The user a request acts for. Passed explicitly to every operation that
/// stamps or checks a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub userid: i64,
}

/// `X-User-Id: <id>` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdHeader(pub i64);

impl headers::Header for UserIdHeader {
    fn name() -> &'static HeaderName {
        &X_USER_ID
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(UserIdHeader)
            .ok_or_else(headers::Error::invalid)
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        values.extend(std::iter::once(HeaderValue::from(self.0)));
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(UserIdHeader(userid)) =
            TypedHeader::<UserIdHeader>::from_request_parts(parts, state)
                .await
                .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;
        Ok(Session { userid })
    }
}
