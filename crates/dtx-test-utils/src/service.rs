//! Scripted analysis service
//!
//! Replies are chosen per category, optionally narrowed to images whose
//! source URL contains a given fragment. Queued one-shot replies are used
//! before the sticky ones.

use async_trait::async_trait;
use dtx_core::TokenCategory;
use dtx_extract::{AnalysisRequest, AnalysisService, ServiceError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// What the service answers
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Fail(ServiceError),
    /// Answer after a delay
    Delay(Duration, Box<Reply>),
    /// Never answer
    Hang,
}

#[derive(Debug)]
struct Rule {
    category: TokenCategory,
    source: Option<String>,
    once: VecDeque<Reply>,
    sticky: Option<Reply>,
}

impl Rule {
    fn matches(&self, request: &AnalysisRequest) -> bool {
        self.category == request.category
            && self
                .source
                .as_deref()
                .map_or(true, |fragment| request.image.source_url.contains(fragment))
    }
}

#[derive(Debug)]
pub struct ScriptedAnalysisService {
    rules: Mutex<Vec<Rule>>,
    calls: AtomicUsize,
    healthy: AtomicBool,
}

impl Default for ScriptedAnalysisService {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }
}

impl ScriptedAnalysisService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(&self, category: TokenCategory, source: Option<&str>, f: impl FnOnce(&mut Rule)) {
        let mut rules = self.rules.lock();
        let index = rules
            .iter()
            .position(|r| r.category == category && r.source.as_deref() == source)
            .unwrap_or_else(|| {
                rules.push(Rule {
                    category,
                    source: source.map(str::to_string),
                    once: VecDeque::new(),
                    sticky: None,
                });
                rules.len() - 1
            });
        f(&mut rules[index]);
    }

    /// Always answer `category` with `reply`
    #[must_use]
    pub fn respond(self, category: TokenCategory, reply: Reply) -> Self {
        self.rule(category, None, |r| r.sticky = Some(reply));
        self
    }

    /// Answer `category` for images whose source contains `fragment`
    #[must_use]
    pub fn respond_for(self, fragment: &str, category: TokenCategory, reply: Reply) -> Self {
        self.rule(category, Some(fragment), |r| r.sticky = Some(reply));
        self
    }

    /// Queue a one-shot reply for `category`
    #[must_use]
    pub fn respond_once(self, category: TokenCategory, reply: Reply) -> Self {
        self.rule(category, None, |r| r.once.push_back(reply));
        self
    }

    /// Make the readiness probe fail
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Calls received so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &AnalysisRequest) -> Option<Reply> {
        let mut rules = self.rules.lock();
        // Source-specific rules take precedence.
        rules.sort_by_key(|r| r.source.is_none());
        let rule = rules.iter_mut().find(|r| r.matches(request))?;
        rule.once.pop_front().or_else(|| rule.sticky.clone())
    }
}

async fn play(reply: Reply) -> Result<Value, ServiceError> {
    let mut reply = reply;
    loop {
        match reply {
            Reply::Json(value) => return Ok(value),
            Reply::Fail(err) => return Err(err),
            Reply::Delay(delay, next) => {
                tokio::time::sleep(delay).await;
                reply = *next;
            }
            Reply::Hang => std::future::pending::<()>().await,
        }
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalysisService {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, request: AnalysisRequest) -> Result<Value, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply(&request).ok_or_else(|| ServiceError::Rejected {
            status: 400,
            message: format!("no scripted reply for {}", request.category),
        })?;
        play(reply).await
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::Unavailable {
                status: 503,
                retry_after: None,
            })
        }
    }
}

/// Color response body: `(name, hex, confidence)`
#[must_use]
pub fn color_response(colors: &[(&str, &str, f64)]) -> Value {
    let colors: Vec<Value> = colors
        .iter()
        .map(|(name, hex, confidence)| {
            json!({
                "name": name,
                "hex": hex,
                "description": format!("{name} from screenshot"),
                "confidence": confidence
            })
        })
        .collect();
    json!({ "colors": colors })
}

/// Spacing response body: `(name, px, confidence)`
#[must_use]
pub fn spacing_response(spacing: &[(&str, f64, f64)]) -> Value {
    let spacing: Vec<Value> = spacing
        .iter()
        .map(|(name, px, confidence)| {
            json!({
                "name": name,
                "value_px": px,
                "description": format!("{name} spacing"),
                "confidence": confidence
            })
        })
        .collect();
    json!({ "spacing": spacing })
}
