//! Query abstraction and construction of asynchronous job submissions.

use std::fmt;

use reqwest::Method;
use url::form_urlencoded;
use url::Url;

use crate::types::RequestDescriptor;

/// Query language identifier sent as the `LANG` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryLanguage {
    Adql,
    Pql,
    /// Any language the service understands that has no built-in variant.
    Other(String),
}

impl QueryLanguage {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Adql => "ADQL",
            Self::Pql => "PQL",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for QueryLanguage {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADQL" => Self::Adql,
            "PQL" => Self::Pql,
            _ => Self::Other(value.trim().to_owned()),
        }
    }
}

impl fmt::Display for QueryLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can be submitted as a query.
pub trait Query: Send + Sync {
    fn query_language(&self) -> QueryLanguage;

    fn query(&self) -> &str;
}

/// Plain query text tagged with its language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextQuery {
    language: QueryLanguage,
    text: String,
}

impl TextQuery {
    pub fn new(language: QueryLanguage, text: impl Into<String>) -> Self {
        Self {
            language,
            text: text.into(),
        }
    }

    #[inline]
    pub fn adql(text: impl Into<String>) -> Self {
        Self::new(QueryLanguage::Adql, text)
    }
}

impl Query for TextQuery {
    fn query_language(&self) -> QueryLanguage {
        self.language.clone()
    }

    fn query(&self) -> &str {
        &self.text
    }
}

/// Optional parameters of an asynchronous submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsyncJobParams {
    pub format: Option<String>,
    pub max_records: Option<u64>,
}

/// Build the `POST {base}/async` request creating a job for `query`.
pub fn async_job_request(
    base_url: &Url,
    query: &dyn Query,
    params: &AsyncJobParams,
) -> Result<RequestDescriptor, url::ParseError> {
    let url = Url::parse(&format!(
        "{}/async",
        base_url.as_str().trim_end_matches('/')
    ))?;

    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("REQUEST", "doQuery")
        .append_pair("LANG", query.query_language().as_str())
        .append_pair("QUERY", query.query());
    if let Some(format) = &params.format {
        form.append_pair("FORMAT", format);
    }
    if let Some(max) = params.max_records {
        form.append_pair("MAXREC", &max.to_string());
    }

    Ok(RequestDescriptor::new(Method::POST, url).with_form_body(form.finish()))
}
