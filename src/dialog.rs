//! Ordered expect/respond dialogs.
//!
//! A [`Dialog`] is a list of [`Rule`]s. Running it reads the console until
//! one rule's pattern matches the buffered output, performs that rule's
//! [`Action`] and either returns or keeps waiting for further rules.
//!
//! Rules are always tested in declaration order against the whole buffer,
//! so an earlier rule shadows a later one whenever both would match. The
//! matched text (and everything before it) is consumed, which keeps a
//! continuing dialog from firing twice on the same prompt.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::error::ConsoleError;
use crate::pattern::Pattern;
use crate::session::SessionEvent;
use crate::stream::{Console, Stream};

/// Side effect run when a rule matches.
pub type Callback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// What to do when a rule matches.
#[derive(Clone)]
pub enum Action {
    /// Nothing; the match itself is the signal.
    None,
    /// Write text without a line terminator, e.g. a single key at a pager.
    Send(String),
    /// Write text followed by a line terminator.
    SendLine(String),
    /// Look a value up in the [`DialogContext`] and send it as a line.
    SendLineCtx(String),
    /// Run an async side effect such as a settle delay.
    Callback(Callback),
}

impl Action {
    pub fn send(text: impl Into<String>) -> Self {
        Action::Send(text.into())
    }

    pub fn sendline(text: impl Into<String>) -> Self {
        Action::SendLine(text.into())
    }

    pub fn sendline_ctx(key: impl Into<String>) -> Self {
        Action::SendLineCtx(key.into())
    }

    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Action::Callback(Arc::new(move || Box::pin(f())))
    }

    /// Waits `duration` before the dialog carries on.
    pub fn sleep(duration: Duration) -> Self {
        Self::callback(move || tokio::time::sleep(duration))
    }

    async fn perform<S: Stream>(
        &self,
        console: &mut Console<S>,
        ctx: &DialogContext,
    ) -> Result<(), ConsoleError> {
        match self {
            Action::None => Ok(()),
            Action::Send(text) => console.send(text).await,
            Action::SendLine(text) => console.sendline(text).await,
            Action::SendLineCtx(key) => {
                let value = ctx.get(key)?.to_string();
                console.sendline(&value).await
            }
            Action::Callback(callback) => {
                callback().await;
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::None => write!(f, "None"),
            Action::Send(text) => f.debug_tuple("Send").field(text).finish(),
            Action::SendLine(text) => f.debug_tuple("SendLine").field(text).finish(),
            Action::SendLineCtx(key) => f.debug_tuple("SendLineCtx").field(key).finish(),
            Action::Callback(_) => write!(f, "Callback(..)"),
        }
    }
}

/// One expect/respond entry of a dialog.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Pattern,
    action: Action,
    timeout: Option<Duration>,
    continue_after_match: bool,
    continue_timer: bool,
}

impl Rule {
    /// A rule that ends the dialog once its action has run.
    pub fn new(pattern: Pattern, action: Action) -> Self {
        Self {
            pattern,
            action,
            timeout: None,
            continue_after_match: false,
            continue_timer: true,
        }
    }

    /// A terminal rule that only recognises text.
    pub fn expect(pattern: Pattern) -> Self {
        Self::new(pattern, Action::None)
    }

    /// Keep waiting for further rules after this one fires.
    #[must_use]
    pub fn and_continue(mut self) -> Self {
        self.continue_after_match = true;
        self
    }

    /// Give the dialog a fresh full timeout window after this rule fires,
    /// instead of letting the original deadline keep running.
    #[must_use]
    pub fn reset_timer(mut self) -> Self {
        self.continue_timer = false;
        self
    }

    /// Time allowed for the rest of the dialog once this rule fires.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn continues(&self) -> bool {
        self.continue_after_match
    }

    pub fn keeps_timer(&self) -> bool {
        self.continue_timer
    }
}

/// Named values for [`Action::SendLineCtx`].
#[derive(Debug, Clone, Default)]
pub struct DialogContext {
    values: HashMap<String, String>,
}

impl DialogContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Fails loudly on a missing key.
    pub fn get(&self, key: &str) -> Result<&str, ConsoleError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConsoleError::ContextLookup(key.to_string()))
    }
}

/// The rule that ended a dialog run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogMatch {
    /// Position of the rule in the list that was run.
    pub rule_index: usize,
    /// Name of the rule's pattern.
    pub pattern: String,
    /// Text matched by the pattern.
    pub matched: String,
    /// Text between the previous match (or the start of the run) and this one.
    pub before: String,
    /// Everything consumed during the run, up to the end of this match.
    pub transcript: String,
}

/// Result of an expect used for polling, where "not yet" is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectOutcome {
    Matched(DialogMatch),
    TimedOut { buffer: String },
}

impl ExpectOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, ExpectOutcome::Matched(_))
    }

    pub fn matched(self) -> Option<DialogMatch> {
        match self {
            ExpectOutcome::Matched(m) => Some(m),
            ExpectOutcome::TimedOut { .. } => None,
        }
    }
}

/// An ordered rule list. Immutable once built and shareable between
/// sessions.
#[derive(Debug, Clone, Default)]
pub struct Dialog {
    rules: Vec<Rule>,
}

impl Dialog {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs the dialog until a non-continuing rule fires or `timeout`
    /// passes without a match.
    pub async fn run<S: Stream>(
        &self,
        console: &mut Console<S>,
        ctx: &DialogContext,
        timeout: Duration,
    ) -> Result<DialogMatch, ConsoleError> {
        let rules = self.rules.iter().collect::<Vec<_>>();
        run_rules(&rules, console, ctx, timeout).await
    }
}

/// Waits for any of `patterns`, first in list order, without sending
/// anything. A timeout is reported as [`ExpectOutcome::TimedOut`].
pub async fn expect_any<S: Stream>(
    console: &mut Console<S>,
    patterns: &[Pattern],
    timeout: Duration,
) -> Result<ExpectOutcome, ConsoleError> {
    let rules = patterns
        .iter()
        .map(|p| Rule::expect(p.clone()))
        .collect::<Vec<_>>();
    let refs = rules.iter().collect::<Vec<_>>();
    match run_rules(&refs, console, &DialogContext::default(), timeout).await {
        Ok(m) => Ok(ExpectOutcome::Matched(m)),
        Err(ConsoleError::DialogTimeout { buffer, .. }) => Ok(ExpectOutcome::TimedOut { buffer }),
        Err(err) => Err(err),
    }
}

fn first_match(rules: &[&Rule], buffer: &str) -> Option<(usize, usize, usize)> {
    rules.iter().enumerate().find_map(|(index, rule)| {
        rule.pattern
            .find(buffer)
            .map(|(start, end)| (index, start, end))
    })
}

/// The engine behind [`Dialog::run`]. Takes borrowed rules so callers can
/// splice path rules, terminal prompts and default statements together
/// without cloning them.
pub(crate) async fn run_rules<S: Stream>(
    rules: &[&Rule],
    console: &mut Console<S>,
    ctx: &DialogContext,
    timeout: Duration,
) -> Result<DialogMatch, ConsoleError> {
    let start = Instant::now();
    let mut deadline = start + timeout;
    let mut transcript = String::new();
    let mut need_input = false;

    loop {
        if !need_input && let Some((index, m_start, m_end)) = first_match(rules, console.buffer()) {
            let rule = rules[index];
            let consumed = console.consume(m_end);
            let before = consumed[..m_start].to_string();
            let matched = consumed[m_start..].to_string();
            transcript.push_str(&consumed);

            debug!(
                "dialog rule {} '{}' matched {:?}",
                index,
                rule.pattern.name(),
                matched
            );
            console.record(SessionEvent::DialogMatched {
                pattern: rule.pattern.name().to_string(),
                matched: matched.clone(),
            });

            rule.action.perform(console, ctx).await?;

            if !rule.continue_after_match {
                return Ok(DialogMatch {
                    rule_index: index,
                    pattern: rule.pattern.name().to_string(),
                    matched,
                    before,
                    transcript,
                });
            }

            if let Some(window) = rule.timeout {
                deadline = Instant::now() + window;
            } else if !rule.continue_timer {
                deadline = Instant::now() + timeout;
            }
            // An empty match consumed nothing; wait for new output before
            // testing again.
            need_input = consumed.is_empty();
            continue;
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ConsoleError::DialogTimeout {
                elapsed: now - start,
                buffer: console.buffer().to_string(),
            });
        }
        if console.fill(deadline - now).await? {
            need_input = false;
        }
    }
}
