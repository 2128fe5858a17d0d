//! Typed request parameters.
//!
//! A request carries any number of [`Param`]s. Query parameters merge into the
//! URL; form and JSON parameters each select the request body encoding, so at
//! most one of the two kinds may appear. [`ApiRequest::new`] rejects a request
//! that mixes them.

use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use reqwest::multipart::Form;
use url::form_urlencoded;

use crate::Error;
use crate::constants::DEFAULT_API_VERSION;

/// A value that can be rendered into a query or form field.
///
/// Lists render comma-separated, matching how the API expects `id` lists.
pub trait ParamValue {
    /// Renders the value as a field string.
    fn to_param(&self) -> String;
}

macro_rules! display_param {
    ($($ty:ty),*) => {
        $(impl ParamValue for $ty {
            fn to_param(&self) -> String {
                self.to_string()
            }
        })*
    };
}

display_param!(str, String, bool, u8, u16, u32, u64, usize, i32, i64);

impl<T: ParamValue + ?Sized> ParamValue for &T {
    fn to_param(&self) -> String {
        (**self).to_param()
    }
}

impl<T: ParamValue> ParamValue for [T] {
    fn to_param(&self) -> String {
        self.iter()
            .map(ParamValue::to_param)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<T: ParamValue> ParamValue for Vec<T> {
    fn to_param(&self) -> String {
        self.as_slice().to_param()
    }
}

/// Ordered key/value fields for query strings and form bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    /// Creates an empty field set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, replacing an earlier value for the same key.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl ParamValue) -> Self {
        let value = value.to_param();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value,
            None => self.0.push((key.to_string(), value)),
        }
        self
    }

    /// Iterates over the fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encodes the fields as `application/x-www-form-urlencoded`.
    #[must_use]
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }
}

/// One typed request parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Merged into the URL query string.
    Query(Fields),
    /// Sent as a form-encoded body.
    Form(Fields),
    /// Sent as a JSON body.
    Json(serde_json::Value),
}

impl Param {
    fn kind(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Form(_) => "form",
            Self::Json(_) => "json",
        }
    }
}

/// Rebuilds a multipart body for each attempt; streamed parts cannot be resent.
pub(crate) type MultipartFactory = Arc<dyn Fn() -> Form + Send + Sync>;

/// Encoded request body.
#[derive(Clone)]
pub(crate) enum Body {
    Empty,
    Form(String),
    Json(Vec<u8>),
    Multipart(MultipartFactory),
}

impl Body {
    pub(crate) fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty | Self::Multipart(_) => None,
            Self::Form(_) => Some("application/x-www-form-urlencoded"),
            Self::Json(_) => Some("application/json"),
        }
    }

    /// Returns a fresh copy of a byte body; multipart bodies have none.
    pub(crate) fn bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Empty | Self::Multipart(_) => None,
            Self::Form(form) => Some(form.clone().into_bytes()),
            Self::Json(json) => Some(json.clone()),
        }
    }

    /// Body text for verbose tracing.
    pub(crate) fn describe(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Form(form) => Some(form.clone()),
            Self::Json(json) => Some(String::from_utf8_lossy(json).into_owned()),
            Self::Multipart(_) => Some("<multipart>".to_string()),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Form(form) => f.debug_tuple("Form").field(form).finish(),
            Self::Json(json) => f.debug_tuple("Json").field(&json.len()).finish(),
            Self::Multipart(_) => f.write_str("Multipart"),
        }
    }
}

/// One logical API operation.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) api_version: u32,
    pub(crate) query: Fields,
    pub(crate) body: Body,
}

impl ApiRequest {
    /// Builds a request from typed parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if more than one body parameter
    /// (form or JSON) is supplied, or the JSON value cannot be serialized.
    pub fn new(method: Method, path: impl Into<String>, params: Vec<Param>) -> Result<Self, Error> {
        let mut query = Fields::new();
        let mut body = Body::Empty;
        let mut body_kind: Option<&'static str> = None;

        for param in params {
            if !matches!(param, Param::Query(_)) {
                if let Some(previous) = body_kind {
                    return Err(Error::invalid_request(format!(
                        "request body already encoded as {previous}, cannot add {}",
                        param.kind()
                    )));
                }
                body_kind = Some(param.kind());
            }
            match param {
                Param::Query(fields) => {
                    for (k, v) in fields.iter() {
                        query = query.set(k, v);
                    }
                }
                Param::Form(fields) => body = Body::Form(fields.encode()),
                Param::Json(value) => {
                    let encoded = serde_json::to_vec(&value)
                        .map_err(|e| Error::invalid_request(format!("json body: {e}")))?;
                    body = Body::Json(encoded);
                }
            }
        }

        Ok(Self {
            method,
            path: path.into(),
            api_version: DEFAULT_API_VERSION,
            query,
            body,
        })
    }

    /// Creates a GET request with no parameters.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            api_version: DEFAULT_API_VERSION,
            query: Fields::new(),
            body: Body::Empty,
        }
    }

    /// Creates a multipart request whose body is rebuilt by `factory` on every attempt.
    pub(crate) fn multipart(method: Method, path: impl Into<String>, factory: MultipartFactory) -> Self {
        Self {
            method,
            path: path.into(),
            api_version: DEFAULT_API_VERSION,
            query: Fields::new(),
            body: Body::Multipart(factory),
        }
    }

    /// Adds query fields to an already built request.
    #[must_use]
    pub fn with_query(mut self, fields: &Fields) -> Self {
        for (k, v) in fields.iter() {
            self.query = self.query.set(k, v);
        }
        self
    }

    /// Pins the `X-Accellion-Version` sent with this request.
    #[must_use]
    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the merged query fields.
    #[must_use]
    pub fn query(&self) -> &Fields {
        &self.query
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
