//! Device CLI modelled as named states connected by command paths.
//!
//! A [`Topology`] holds the immutable graph: states with their prompt
//! patterns, directed paths with the command (and optional dialog) that
//! moves the device along them, and default statements that are merged
//! into every transition. It is built once per device model and shared
//! through an `Arc`. A [`StateMachine`] pairs a topology with the state one
//! session currently believes the device to be in.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dialog::{Dialog, DialogContext, DialogMatch, Rule, run_rules};
use crate::error::ConsoleError;
use crate::pattern::Pattern;
use crate::session::SessionEvent;
use crate::stream::{Console, Stream};

/// A CLI mode recognised by its prompt.
#[derive(Debug, Clone)]
pub struct State {
    name: String,
    pattern: Pattern,
    accepts_commands: bool,
    samples: Vec<String>,
}

impl State {
    pub fn new(name: impl Into<String>, pattern: Pattern) -> Self {
        Self {
            name: name.into(),
            pattern,
            accepts_commands: true,
            samples: Vec::new(),
        }
    }

    /// A prompt this state prints. Samples are checked against every other
    /// state's pattern when the topology is built.
    #[must_use]
    pub fn sample(mut self, prompt: impl Into<String>) -> Self {
        self.samples.push(prompt.into());
        self
    }

    /// Marks the state as transitional: `execute` is refused while in it.
    #[must_use]
    pub fn no_commands(mut self) -> Self {
        self.accepts_commands = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn accepts_commands(&self) -> bool {
        self.accepts_commands
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }
}

/// A directed edge: in `from`, sending `command` leads to `to`.
#[derive(Debug, Clone)]
pub struct Path {
    from: String,
    to: String,
    command: String,
    dialog: Option<Dialog>,
}

impl Path {
    pub fn new(from: impl Into<String>, to: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            command: command.into(),
            dialog: None,
        }
    }

    /// Dialog handled while the transition is in flight.
    #[must_use]
    pub fn dialog(mut self, dialog: Dialog) -> Self {
        self.dialog = Some(dialog);
        self
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn transition_dialog(&self) -> Option<&Dialog> {
        self.dialog.as_ref()
    }
}

/// Additions and replacements a product variant applies to a base
/// topology.
#[derive(Debug, Clone, Default)]
pub struct TopologyOverlay {
    states: Vec<State>,
    paths: Vec<Path>,
    removed_paths: Vec<(String, String)>,
    default_statements: Vec<Rule>,
}

impl TopologyOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a state, replacing any base state with the same name.
    #[must_use]
    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    /// Adds a path, replacing any base path with the same endpoints.
    #[must_use]
    pub fn path(mut self, path: Path) -> Self {
        self.paths.push(path);
        self
    }

    #[must_use]
    pub fn remove_path(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.removed_paths.push((from.into(), to.into()));
        self
    }

    #[must_use]
    pub fn default_statement(mut self, rule: Rule) -> Self {
        self.default_statements.push(rule);
        self
    }
}

#[derive(Debug, Default)]
pub struct TopologyBuilder {
    states: Vec<State>,
    paths: Vec<Path>,
    default_statements: Vec<Rule>,
    overlays: Vec<TopologyOverlay>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    #[must_use]
    pub fn path(mut self, path: Path) -> Self {
        self.paths.push(path);
        self
    }

    /// A background rule applied during every transition, after the path's
    /// own rules and the target prompt.
    #[must_use]
    pub fn default_statement(mut self, rule: Rule) -> Self {
        self.default_statements.push(rule);
        self
    }

    #[must_use]
    pub fn default_statements(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.default_statements.extend(rules);
        self
    }

    #[must_use]
    pub fn overlay(mut self, overlay: TopologyOverlay) -> Self {
        self.overlays.push(overlay);
        self
    }

    /// Merges overlays, validates the graph and freezes it.
    pub fn build(self) -> Result<Arc<Topology>, ConsoleError> {
        let TopologyBuilder {
            mut states,
            mut paths,
            mut default_statements,
            overlays,
        } = self;

        let mut seen = HashSet::new();
        for state in &states {
            if !seen.insert(state.name.clone()) {
                return Err(ConsoleError::InvalidConfig(format!(
                    "state '{}' declared twice",
                    state.name
                )));
            }
        }

        for overlay in overlays {
            for state in overlay.states {
                match states.iter_mut().find(|s| s.name == state.name) {
                    Some(existing) => *existing = state,
                    None => states.push(state),
                }
            }
            paths.retain(|p| {
                !overlay
                    .removed_paths
                    .iter()
                    .any(|(from, to)| p.from == *from && p.to == *to)
            });
            for path in overlay.paths {
                match paths
                    .iter_mut()
                    .find(|p| p.from == path.from && p.to == path.to)
                {
                    Some(existing) => *existing = path,
                    None => paths.push(path),
                }
            }
            default_statements.extend(overlay.default_statements);
        }

        let index = states
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect::<HashMap<_, _>>();

        let topology = Topology {
            states,
            index,
            paths,
            default_statements,
        };
        topology.validate()?;
        Ok(Arc::new(topology))
    }
}

/// Immutable state graph shared by every session of one device model.
#[derive(Debug)]
pub struct Topology {
    states: Vec<State>,
    index: HashMap<String, usize>,
    paths: Vec<Path>,
    default_statements: Vec<Rule>,
}

/// Diagnostics summary for a state graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TopologyDiagnostics {
    /// Number of declared states.
    pub total_states: usize,
    /// Number of declared paths.
    pub total_paths: usize,
    /// States touched by at least one path.
    pub graph_states: Vec<String>,
    /// Graph states with no incoming path.
    pub entry_states: Vec<String>,
    /// States no path touches, reachable only by detection.
    pub isolated_states: Vec<String>,
    /// Graph states that cannot be reached from the entry states.
    pub unreachable_states: Vec<String>,
    /// States with no outgoing path.
    pub dead_end_states: Vec<String>,
    /// States whose outgoing paths all loop back to themselves.
    pub self_loop_only_states: Vec<String>,
    /// States declared without a sample prompt, so ambiguity checks could
    /// not cover them.
    pub states_without_samples: Vec<String>,
}

impl TopologyDiagnostics {
    /// Dead ends are normal for recovery modes, so only unreachable and
    /// self-loop-only states count as issues.
    pub fn has_issues(&self) -> bool {
        !self.unreachable_states.is_empty() || !self.self_loop_only_states.is_empty()
    }
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::new()
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.index.get(name).map(|&i| &self.states[i])
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn default_statements(&self) -> &[Rule] {
        &self.default_statements
    }

    fn require_state(&self, name: &str) -> Result<&State, ConsoleError> {
        self.state(name)
            .ok_or_else(|| ConsoleError::UnknownState(name.to_string()))
    }

    fn validate(&self) -> Result<(), ConsoleError> {
        let mut endpoints = HashSet::new();
        for path in &self.paths {
            for end in [&path.from, &path.to] {
                if !self.index.contains_key(end) {
                    return Err(ConsoleError::InvalidConfig(format!(
                        "path '{}' -> '{}' references unknown state '{}'",
                        path.from, path.to, end
                    )));
                }
            }
            if !endpoints.insert((path.from.as_str(), path.to.as_str())) {
                return Err(ConsoleError::InvalidConfig(format!(
                    "path '{}' -> '{}' declared twice",
                    path.from, path.to
                )));
            }
        }

        let mut sources: HashMap<&str, &str> = HashMap::new();
        for state in &self.states {
            if let Some(other) = sources.insert(state.pattern.as_str(), state.name.as_str()) {
                return Err(ConsoleError::InvalidConfig(format!(
                    "states '{}' and '{}' share prompt pattern {:?}",
                    other,
                    state.name,
                    state.pattern.as_str()
                )));
            }
        }

        for state in &self.states {
            for sample in &state.samples {
                if !state.pattern.is_match(sample) {
                    return Err(ConsoleError::InvalidConfig(format!(
                        "sample {:?} does not match the prompt of state '{}'",
                        sample, state.name
                    )));
                }
                if let Some(other) = self
                    .states
                    .iter()
                    .find(|o| o.name != state.name && o.pattern.is_match(sample))
                {
                    return Err(ConsoleError::InvalidConfig(format!(
                        "prompt {:?} of state '{}' is also matched by state '{}'",
                        sample, state.name, other.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Shortest sequence of paths from `from` to `to`.
    ///
    /// Breadth-first over paths in declaration order, so among equally
    /// short routes the one declared first wins.
    pub fn find_path(&self, from: &str, to: &str) -> Result<Vec<&Path>, ConsoleError> {
        self.require_state(from)?;
        self.require_state(to)?;
        if from == to {
            return Ok(Vec::new());
        }

        let mut adj_list: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, path) in self.paths.iter().enumerate() {
            adj_list.entry(path.from.as_str()).or_default().push(i);
        }

        let mut queue = VecDeque::new();
        queue.push_back(from);
        let mut visited = HashSet::new();
        visited.insert(from);
        // child state -> index of the path that first reached it
        let mut predecessors: HashMap<&str, usize> = HashMap::new();

        while let Some(current) = queue.pop_front() {
            if current == to {
                break;
            }
            if let Some(edges) = adj_list.get(current) {
                for &edge in edges {
                    let next = self.paths[edge].to.as_str();
                    if visited.insert(next) {
                        predecessors.insert(next, edge);
                        queue.push_back(next);
                    }
                }
            }
        }

        if !predecessors.contains_key(to) {
            return Err(ConsoleError::NoPath {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let mut route = Vec::new();
        let mut current = to;
        while current != from {
            let Some(&edge) = predecessors.get(current) else {
                return Err(ConsoleError::Internal(format!(
                    "failed to backtrack path from '{to}' to '{from}'"
                )));
            };
            let path = &self.paths[edge];
            route.push(path);
            current = path.from.as_str();
        }
        route.reverse();
        trace!(
            "route {} -> {}: {:?}",
            from,
            to,
            route.iter().map(|p| p.command.as_str()).collect::<Vec<_>>()
        );
        Ok(route)
    }

    pub fn diagnose(&self) -> TopologyDiagnostics {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut graph_states_set: HashSet<&str> = HashSet::new();
        for path in &self.paths {
            graph_states_set.insert(path.from.as_str());
            graph_states_set.insert(path.to.as_str());
            adjacency
                .entry(path.from.as_str())
                .or_default()
                .push(path.to.as_str());
            *in_degree.entry(path.to.as_str()).or_insert(0) += 1;
        }

        let mut graph_states = graph_states_set.iter().copied().collect::<Vec<_>>();
        graph_states.sort();

        let mut isolated_states = self
            .states
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| !graph_states_set.contains(name))
            .map(str::to_string)
            .collect::<Vec<_>>();
        isolated_states.sort();

        let entry_states = graph_states
            .iter()
            .filter(|name| in_degree.get(*name).copied().unwrap_or(0) == 0)
            .map(|name| name.to_string())
            .collect::<Vec<_>>();

        // Fallback: if no root-like node exists (fully cyclic graph), pick stable seed.
        let seeds = if entry_states.is_empty() {
            graph_states
                .first()
                .copied()
                .into_iter()
                .collect::<Vec<_>>()
        } else {
            entry_states.iter().map(String::as_str).collect()
        };

        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();
        for seed in seeds {
            if reachable.insert(seed) {
                queue.push_back(seed);
            }
        }
        while let Some(node) = queue.pop_front() {
            if let Some(neighbors) = adjacency.get(node) {
                for &next in neighbors {
                    if reachable.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        let unreachable_states = graph_states
            .iter()
            .filter(|name| !reachable.contains(*name))
            .map(|name| name.to_string())
            .collect::<Vec<_>>();

        let dead_end_states = graph_states
            .iter()
            .filter(|name| !adjacency.contains_key(*name))
            .map(|name| name.to_string())
            .collect::<Vec<_>>();

        let self_loop_only_states = graph_states
            .iter()
            .filter(|name| {
                adjacency
                    .get(*name)
                    .map(|targets| targets.iter().all(|t| t == *name))
                    .unwrap_or(false)
            })
            .map(|name| name.to_string())
            .collect::<Vec<_>>();

        let mut states_without_samples = self
            .states
            .iter()
            .filter(|s| s.samples.is_empty())
            .map(|s| s.name.clone())
            .collect::<Vec<_>>();
        states_without_samples.sort();

        TopologyDiagnostics {
            total_states: self.states.len(),
            total_paths: self.paths.len(),
            graph_states: graph_states.iter().map(|name| name.to_string()).collect(),
            entry_states,
            isolated_states,
            unreachable_states,
            dead_end_states,
            self_loop_only_states,
            states_without_samples,
        }
    }
}

/// Per-session view of a topology: which state the device is believed to
/// be in.
#[derive(Debug, Clone)]
pub struct StateMachine {
    topology: Arc<Topology>,
    current: Option<String>,
}

impl StateMachine {
    /// Starts with the state unknown; call [`StateMachine::go_to_any`] or
    /// [`StateMachine::update_state`] before executing commands.
    pub fn new(topology: Arc<Topology>) -> Self {
        Self {
            topology,
            current: None,
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn current_state(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Records a state learned out of band, e.g. after waiting for a boot
    /// prompt by hand.
    pub fn update_state(&mut self, name: &str) -> Result<(), ConsoleError> {
        self.topology.require_state(name)?;
        debug!("state set to '{}'", name);
        self.current = Some(name.to_string());
        Ok(())
    }

    /// Forgets the current state so the next transition re-detects it.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    /// Sends an empty line to the console and matches every state's
    /// prompt, in declaration order, to find where the device is.
    pub async fn go_to_any<S: Stream>(
        &mut self,
        console: &mut Console<S>,
        ctx: &DialogContext,
        timeout: Duration,
    ) -> Result<String, ConsoleError> {
        let topology = Arc::clone(&self.topology);
        self.current = None;

        console.discard().await?;
        console.sendline("").await?;

        let terminals = topology
            .states
            .iter()
            .map(|s| Rule::expect(s.pattern.clone()))
            .collect::<Vec<_>>();
        let rules = terminals
            .iter()
            .chain(topology.default_statements.iter())
            .collect::<Vec<_>>();

        let found = match run_rules(&rules, console, ctx, timeout).await {
            Ok(m) if m.rule_index < terminals.len() => m,
            Ok(m) => {
                return Err(ConsoleError::StateDetection {
                    buffer: m.transcript,
                });
            }
            Err(ConsoleError::DialogTimeout { buffer, .. }) => {
                return Err(ConsoleError::StateDetection { buffer });
            }
            Err(err) => return Err(err),
        };

        let state = topology.states[found.rule_index].name.clone();
        info!("detected state '{}'", state);
        console.record(SessionEvent::StateDetected {
            state: state.clone(),
            prompt: found.matched.clone(),
        });
        self.current = Some(state.clone());
        Ok(state)
    }

    /// Walks the shortest route to `target`, detecting the current state
    /// first if it is unknown. Already being there sends nothing.
    ///
    /// The state is committed after every completed path, so a failure
    /// leaves it at the last state actually reached.
    pub async fn go_to<S: Stream>(
        &mut self,
        target: &str,
        console: &mut Console<S>,
        ctx: &DialogContext,
        timeout: Duration,
    ) -> Result<(), ConsoleError> {
        let topology = Arc::clone(&self.topology);
        topology.require_state(target)?;

        let from = match self.current.clone() {
            Some(current) => current,
            None => self.go_to_any(console, ctx, timeout).await?,
        };
        if from == target {
            trace!("already in '{}'", target);
            return Ok(());
        }

        let route = topology.find_path(&from, target)?;
        debug!(
            "go to '{}' from '{}' via {} path(s)",
            target,
            from,
            route.len()
        );
        for path in route {
            self.run_path(&topology, path, console, ctx, timeout).await?;
        }
        Ok(())
    }

    async fn run_path<S: Stream>(
        &mut self,
        topology: &Topology,
        path: &Path,
        console: &mut Console<S>,
        ctx: &DialogContext,
        timeout: Duration,
    ) -> Result<(), ConsoleError> {
        let target = topology.require_state(&path.to)?;
        let terminal = Rule::expect(target.pattern.clone());

        let mut rules = path
            .dialog
            .as_ref()
            .map(|d| d.rules().iter().collect::<Vec<_>>())
            .unwrap_or_default();
        let terminal_index = rules.len();
        rules.push(&terminal);
        rules.extend(topology.default_statements.iter());

        console.discard().await?;
        console.sendline(&path.command).await?;

        let m = run_rules(&rules, console, ctx, timeout).await?;
        if m.rule_index != terminal_index {
            // A stop rule of the path dialog ended early; the target prompt
            // still has to show up.
            self.wait_for_prompt(topology, &terminal, console, ctx, timeout)
                .await?;
        }

        debug!("'{}' -> '{}' done", path.from, path.to);
        console.record(SessionEvent::StateChanged {
            from: self.current.clone(),
            to: path.to.clone(),
            command: path.command.clone(),
        });
        self.current = Some(path.to.clone());
        Ok(())
    }

    async fn wait_for_prompt<S: Stream>(
        &self,
        topology: &Topology,
        terminal: &Rule,
        console: &mut Console<S>,
        ctx: &DialogContext,
        timeout: Duration,
    ) -> Result<DialogMatch, ConsoleError> {
        let rules = std::iter::once(terminal)
            .chain(topology.default_statements.iter())
            .collect::<Vec<_>>();
        let m = run_rules(&rules, console, ctx, timeout).await?;
        if m.rule_index != 0 {
            return Err(ConsoleError::StateDetection {
                buffer: m.transcript,
            });
        }
        Ok(m)
    }

    /// Sends `command` in the current state and returns what it printed,
    /// without the echoed command and the trailing prompt.
    pub async fn execute<S: Stream>(
        &mut self,
        command: &str,
        console: &mut Console<S>,
        ctx: &DialogContext,
        timeout: Duration,
    ) -> Result<String, ConsoleError> {
        let topology = Arc::clone(&self.topology);
        let state = match self.current.as_deref() {
            Some(name) => topology.require_state(name)?,
            None => {
                return Err(ConsoleError::CommandNotAccepted {
                    state: "unknown".to_string(),
                });
            }
        };
        if !state.accepts_commands {
            return Err(ConsoleError::CommandNotAccepted {
                state: state.name.clone(),
            });
        }

        let terminal = Rule::expect(state.pattern.clone());
        console.discard().await?;
        console.sendline(command).await?;
        let m = self
            .wait_for_prompt(&topology, &terminal, console, ctx, timeout)
            .await?;

        let output = clean_output(command, &m.transcript);
        console.record(SessionEvent::CommandOutput {
            command: command.to_string(),
            state: state.name.clone(),
            success: true,
            content: output.clone(),
            all: m.transcript,
        });
        Ok(output)
    }
}

/// Normalises line endings, then drops the echoed command and the trailing
/// prompt line.
pub(crate) fn clean_output(command: &str, transcript: &str) -> String {
    let all = transcript.replace("\r\n", "\n").replace('\r', "");
    let mut content = all.as_str();

    if !command.is_empty() && content.starts_with(command) {
        content = content
            .strip_prefix(command)
            .unwrap_or(content)
            .trim_start_matches('\n');
    } else if command.is_empty() {
        content = content.strip_prefix('\n').unwrap_or(content);
    }

    match content.rfind('\n') {
        Some(pos) => content[..pos].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::Action;

    fn pattern(name: &str, regex: &str) -> Pattern {
        Pattern::new(name, regex).expect("pattern")
    }

    fn abc() -> Arc<Topology> {
        Topology::builder()
            .state(State::new("a", pattern("a", r"A> $")).sample("A> "))
            .state(State::new("b", pattern("b", r"B> $")).sample("B> "))
            .state(State::new("c", pattern("c", r"C> $")).sample("C> "))
            .path(Path::new("a", "b", "x"))
            .path(Path::new("b", "c", "y"))
            .build()
            .expect("topology should build")
    }

    #[test]
    fn shortest_route_follows_declared_paths() {
        let topology = abc();
        let route = topology.find_path("a", "c").expect("route");
        let commands = route.iter().map(|p| p.command()).collect::<Vec<_>>();
        assert_eq!(commands, vec!["x", "y"]);
    }

    #[test]
    fn missing_reverse_edge_is_no_path() {
        let topology = abc();
        let err = topology.find_path("c", "a").expect_err("no reverse edges");
        assert!(matches!(err, ConsoleError::NoPath { from, to } if from == "c" && to == "a"));
    }

    #[test]
    fn bfs_prefers_fewer_hops() {
        let topology = Topology::builder()
            .state(State::new("a", pattern("a", r"A> $")))
            .state(State::new("b", pattern("b", r"B> $")))
            .state(State::new("c", pattern("c", r"C> $")))
            .path(Path::new("a", "b", "x"))
            .path(Path::new("b", "c", "y"))
            .path(Path::new("a", "c", "z"))
            .build()
            .expect("topology");
        let route = topology.find_path("a", "c").expect("route");
        assert_eq!(route.len(), 1);
        assert_eq!(route[0].command(), "z");
    }

    #[test]
    fn unknown_path_endpoint_is_rejected() {
        let err = Topology::builder()
            .state(State::new("a", pattern("a", r"A> $")))
            .path(Path::new("a", "ghost", "boo"))
            .build()
            .expect_err("ghost endpoint");
        assert!(matches!(err, ConsoleError::InvalidConfig(msg) if msg.contains("ghost")));
    }

    #[test]
    fn shared_pattern_source_is_rejected() {
        let err = Topology::builder()
            .state(State::new("login", pattern("login", r"dev> $")))
            .state(State::new("enable", pattern("enable", r"dev> $")))
            .build()
            .expect_err("duplicate prompt");
        assert!(matches!(err, ConsoleError::InvalidConfig(msg) if msg.contains("share")));
    }

    #[test]
    fn overlapping_prompt_samples_are_rejected() {
        // "dev# " would be claimed by both patterns.
        let err = Topology::builder()
            .state(State::new("enable", pattern("enable", r"dev# $")).sample("dev# "))
            .state(State::new("any-hash", pattern("any-hash", r"# $")).sample("x# "))
            .build()
            .expect_err("ambiguous prompts");
        assert!(matches!(
            err,
            ConsoleError::InvalidConfig(msg) if msg.contains("enable") && msg.contains("any-hash")
        ));
    }

    #[test]
    fn sample_must_match_its_own_state() {
        let err = Topology::builder()
            .state(State::new("a", pattern("a", r"A> $")).sample("B> "))
            .build()
            .expect_err("bad sample");
        assert!(matches!(err, ConsoleError::InvalidConfig(_)));
    }

    #[test]
    fn overlay_replaces_and_removes_paths() {
        let overlay = TopologyOverlay::new()
            .path(Path::new("a", "b", "x2"))
            .remove_path("b", "c")
            .path(Path::new("c", "a", "back"));
        let topology = Topology::builder()
            .state(State::new("a", pattern("a", r"A> $")))
            .state(State::new("b", pattern("b", r"B> $")))
            .state(State::new("c", pattern("c", r"C> $")))
            .path(Path::new("a", "b", "x"))
            .path(Path::new("b", "c", "y"))
            .overlay(overlay)
            .build()
            .expect("topology");

        let commands = topology
            .paths()
            .iter()
            .map(|p| p.command())
            .collect::<Vec<_>>();
        assert_eq!(commands, vec!["x2", "back"]);
        assert!(topology.find_path("b", "c").is_err());
    }

    #[test]
    fn diagnostics_flag_unreachable_and_dead_ends() {
        let topology = Topology::builder()
            .state(State::new("a", pattern("a", r"A> $")).sample("A> "))
            .state(State::new("b", pattern("b", r"B> $")))
            .state(State::new("loop", pattern("loop", r"L> $")))
            .path(Path::new("a", "b", "x"))
            .path(Path::new("loop", "loop", "again"))
            .build()
            .expect("topology");

        let report = topology.diagnose();
        assert_eq!(report.total_states, 3);
        assert_eq!(report.entry_states, vec!["a".to_string()]);
        assert_eq!(report.unreachable_states, vec!["loop".to_string()]);
        assert_eq!(report.dead_end_states, vec!["b".to_string()]);
        assert_eq!(report.self_loop_only_states, vec!["loop".to_string()]);
        assert_eq!(
            report.states_without_samples,
            vec!["b".to_string(), "loop".to_string()]
        );
        assert!(report.has_issues());
    }

    #[test]
    fn clean_output_strips_echo_and_prompt() {
        assert_eq!(
            clean_output(
                "show version",
                "show version\r\nVersion 6.2.1\r\nBuild 1088\r\nkp# "
            ),
            "Version 6.2.1\nBuild 1088"
        );
        assert_eq!(clean_output("top", "top\r\nkp# "), "");
        assert_eq!(clean_output("show", "show\r\nline\r\n> "), "line");
    }

    #[test]
    fn context_templated_dialogs_can_be_attached_to_paths() {
        let path = Path::new("expert", "sudo", "sudo su -").dialog(Dialog::default().rule(
            Rule::new(pattern("password", r"[Pp]assword: ?$"), Action::sendline_ctx("sudo"))
                .and_continue(),
        ));
        assert_eq!(path.transition_dialog().map(|d| d.len()), Some(1));
    }
}
