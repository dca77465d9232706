//! ルーティングテーブル
//!
//! (メソッド, パス) を [`Handler`] に解決する。パターンはリテラルセグメントと
//! 名前付きワイルドカードからなる。ワイルドカードは1つ以上のセグメントにまたがり、
//! `/` を含むコンテナ名やイメージ名も解決できる。各パターンはそのままの形と
//! `/v{version}` プレフィックス付きの両方で登録する。

use super::Handler;
use axum::http::Method;
use fleet_common::error::{RouterError, RouterResult};
use std::collections::HashSet;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Wildcard(String),
    /// `v` に数字とドットが続く
    Version,
}

#[derive(Debug, Clone)]
struct Pattern {
    segments: Vec<Segment>,
    text: String,
}

impl Pattern {
    fn parse(text: &str, versioned: bool) -> Self {
        let mut segments = Vec::new();
        if versioned {
            segments.push(Segment::Version);
        }
        for part in text.split('/').filter(|part| !part.is_empty()) {
            match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(name) => segments.push(Segment::Wildcard(name.to_string())),
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }
        let text = if versioned {
            format!("/v{{version}}{}", text)
        } else {
            text.to_string()
        };
        Self { segments, text }
    }

    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| !matches!(segment, Segment::Wildcard(_)))
            .count()
    }

    /// Match against path segments, returning captured segment ranges.
    fn matches(&self, segments: &[&str]) -> Option<Vec<(String, Range<usize>)>> {
        let mut captures = Vec::new();
        if match_from(&self.segments, segments, 0, &mut captures) {
            Some(captures)
        } else {
            None
        }
    }
}

fn is_version(segment: &str) -> bool {
    match segment.strip_prefix('v') {
        Some(rest) => !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit() || b == b'.'),
        None => false,
    }
}

/// バックトラッキングによる照合（ワイルドカードは最長から試す）
fn match_from(
    pattern: &[Segment],
    segments: &[&str],
    offset: usize,
    captures: &mut Vec<(String, Range<usize>)>,
) -> bool {
    let Some((head, tail)) = pattern.split_first() else {
        return offset == segments.len();
    };
    let remaining = segments.len().saturating_sub(offset);
    match head {
        Segment::Literal(literal) => {
            remaining > 0
                && segments[offset] == literal
                && match_from(tail, segments, offset + 1, captures)
        }
        Segment::Version => {
            remaining > 0
                && is_version(segments[offset])
                && match_from(tail, segments, offset + 1, captures)
        }
        Segment::Wildcard(name) => {
            for span in (1..=remaining).rev() {
                captures.push((name.clone(), offset..offset + span));
                if match_from(tail, segments, offset + span, captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
    }
}

/// リクエストパスから取得したワイルドカードの値
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    path: String,
    captures: Vec<(String, Range<usize>)>,
}

impl PathParams {
    /// Captured value of wildcard `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.captures
            .iter()
            .find(|(capture, _)| capture == name)
            .map(|(_, range)| &self.path[range.clone()])
    }

    /// Request path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request path with wildcard `name` replaced by `value`
    pub fn replace(&self, name: &str, value: &str) -> String {
        match self.captures.iter().find(|(capture, _)| capture == name) {
            Some((_, range)) => format!(
                "{}{}{}",
                &self.path[..range.start],
                value,
                &self.path[range.end..]
            ),
            None => self.path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// 不変のルーティングテーブル
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

/// テーブル確定前にルートを集める
#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    routes: Vec<Route>,
}

impl RouteTableBuilder {
    /// `method` に対して `pattern` を登録（そのままとバージョン付き）
    pub fn route(mut self, method: Method, pattern: &str, handler: Handler) -> Self {
        for versioned in [false, true] {
            self.routes.push(Route {
                method: method.clone(),
                pattern: Pattern::parse(pattern, versioned),
                handler,
            });
        }
        self
    }

    /// `GET` route
    pub fn get(self, pattern: &str, handler: Handler) -> Self {
        self.route(Method::GET, pattern, handler)
    }

    /// `POST` route
    pub fn post(self, pattern: &str, handler: Handler) -> Self {
        self.route(Method::POST, pattern, handler)
    }

    /// `DELETE` route
    pub fn delete(self, pattern: &str, handler: Handler) -> Self {
        self.route(Method::DELETE, pattern, handler)
    }

    /// テーブルを確定する（(メソッド, パターン) の重複はエラー）
    pub fn build(self) -> RouterResult<RouteTable> {
        let mut seen = HashSet::new();
        for route in &self.routes {
            if !seen.insert((route.method.clone(), route.pattern.segments.clone())) {
                return Err(RouterError::Internal(format!(
                    "Duplicate route: {} {}",
                    route.method, route.pattern.text
                )));
            }
        }
        Ok(RouteTable {
            routes: self.routes,
        })
    }
}

impl RouteTable {
    /// Start an empty table
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Resolve `method` and `path`.
    ///
    /// `OPTIONS` はどのパスでも解決する。一致したパターンのうちリテラルセグメントが
    /// 最も多いものを採用するため、登録順は結果に影響しない。
    pub fn resolve(&self, method: &Method, path: &str) -> RouterResult<(Handler, PathParams)> {
        if method == Method::OPTIONS {
            return Ok((Handler::Options, PathParams::default()));
        }

        let mut spans = Vec::new();
        let mut start = 0;
        for part in path.split('/') {
            if !part.is_empty() {
                spans.push(start..start + part.len());
            }
            start += part.len() + 1;
        }
        let segments: Vec<&str> = spans.iter().map(|span| &path[span.clone()]).collect();

        let best = self
            .routes
            .iter()
            .filter(|route| route.method == method)
            .filter_map(|route| route.pattern.matches(&segments).map(|captures| (route, captures)))
            .max_by(|(a, _), (b, _)| {
                a.pattern
                    .literal_count()
                    .cmp(&b.pattern.literal_count())
                    .then_with(|| b.pattern.text.cmp(&a.pattern.text))
            });

        let (route, captures) = best.ok_or(RouterError::RouteNotFound)?;
        let captures = captures
            .into_iter()
            .map(|(name, range)| (name, spans[range.start].start..spans[range.end - 1].end))
            .collect();
        Ok((
            route.handler,
            PathParams {
                path: path.to_string(),
                captures,
            },
        ))
    }

    /// Number of registered (method, pattern) entries
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// マネージャーが提供するRemote API
pub fn remote_api() -> RouterResult<RouteTable> {
    use Handler::*;

    RouteTable::builder()
        // GET
        .get("/_ping", Ping)
        .get("/events", Events)
        .get("/info", Info)
        .get("/version", Version)
        .get("/images/json", ImagesJson)
        .get("/images/viz", NotImplemented)
        .get("/images/search", ProxyRandom)
        .get("/images/get", NotImplemented)
        .get("/images/{name}/get", NotImplemented)
        .get("/images/{name}/history", NotImplemented)
        .get("/images/{name}/json", NotImplemented)
        .get("/containers/ps", ContainersJson)
        .get("/containers/json", ContainersJson)
        .get("/containers/{name}/export", ProxyContainer)
        .get("/containers/{name}/changes", ProxyContainer)
        .get("/containers/{name}/json", ContainerJson)
        .get("/containers/{name}/top", ProxyContainer)
        .get("/containers/{name}/logs", ProxyContainer)
        .get("/containers/{name}/attach/ws", NotImplemented)
        .get("/exec/{execid}/json", ProxyExec)
        // POST
        .post("/auth", ProxyRandom)
        .post("/commit", NotImplemented)
        .post("/build", NotImplemented)
        .post("/images/create", NotImplemented)
        .post("/images/load", NotImplemented)
        .post("/images/{name}/push", NotImplemented)
        .post("/images/{name}/tag", NotImplemented)
        .post("/containers/create", ContainerCreate)
        .post("/containers/{name}/kill", ProxyContainer)
        .post("/containers/{name}/pause", ProxyContainer)
        .post("/containers/{name}/unpause", ProxyContainer)
        .post("/containers/{name}/restart", ProxyContainer)
        .post("/containers/{name}/start", ProxyContainer)
        .post("/containers/{name}/stop", ProxyContainer)
        .post("/containers/{name}/wait", ProxyContainer)
        .post("/containers/{name}/resize", ProxyContainer)
        .post("/containers/{name}/attach", ProxyHijack)
        .post("/containers/{name}/copy", ProxyContainer)
        .post("/containers/{name}/exec", ProxyContainerAndForceRefresh)
        .post("/exec/{execid}/start", ProxyExecHijack)
        .post("/exec/{execid}/resize", ProxyExec)
        // DELETE
        .delete("/containers/{name}", ContainerDelete)
        .delete("/images/{name}", NotImplemented)
        .build()
}
