//! Request header collection as seen by the authorization engine

pub const AUTHORIZATION: &str = "authorization";
/// Pseudo-header carrying the request path (including any query string)
pub const PATH: &str = ":path";
/// Pseudo-header carrying the request method
pub const METHOD: &str = ":method";

/// Case-insensitive header lookup over whatever the transport hands the engine.
///
/// `:path` and `:method` are looked up like any other header. Values that are not valid
/// text are treated as absent.
pub trait HeaderSource {
    /// First value of `name`
    fn header(&self, name: &str) -> Option<&str>;

    /// All headers in order, for verbose logging
    fn header_pairs(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_>;
}

/// Ordered header list with case-insensitive lookup; the first occurrence wins
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders(Vec<(String, String)>);

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.header(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

impl HeaderSource for RequestHeaders {
    fn header(&self, name: &str) -> Option<&str> {
        self.0.header(name)
    }

    fn header_pairs(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(self.iter())
    }
}

impl HeaderSource for Vec<(String, String)> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_pairs(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(self.iter().map(|(n, v)| (n.as_str(), v.as_str())))
    }
}

/// Plain header map; it cannot carry pseudo-headers, so `:path` and `:method` are absent
impl HeaderSource for http::HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| value.to_str().ok())
    }

    fn header_pairs(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(text_headers(self))
    }
}

/// Request head: `:path` is the path and query, `:method` the request method
impl HeaderSource for http::request::Parts {
    fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case(PATH) {
            Some(path_and_query(&self.uri))
        } else if name.eq_ignore_ascii_case(METHOD) {
            Some(self.method.as_str())
        } else {
            self.headers.header(name)
        }
    }

    fn header_pairs(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        let pseudo = [
            (PATH, path_and_query(&self.uri)),
            (METHOD, self.method.as_str()),
        ];
        Box::new(pseudo.into_iter().chain(text_headers(&self.headers)))
    }
}

fn path_and_query(uri: &http::Uri) -> &str {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
}

fn text_headers(headers: &http::HeaderMap) -> impl Iterator<Item = (&str, &str)> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
}
