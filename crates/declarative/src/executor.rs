//! Execution engine - applies a plan in dependency order with bounded parallelism
//!
//! The calling thread schedules: it resolves inputs, dispatches ready
//! operations to a dedicated rayon pool, and receives results over a
//! channel. Provider calls and state writes happen on the workers.

use crate::context::{CancellationToken, ConfirmCallback, ProgressCallback};
use crate::error::{Error, ErrorCategory, ProviderError, Result};
use crate::graph::Graph;
use crate::node::NodeStatus;
use crate::planner::{self, OperationKind, Plan};
use crate::provider::{Inputs, Outputs, ResourceProvider};
use crate::retry::{RetryCallback, RetryConfig, RetryError, with_retry};
use crate::state::{StateRecord, StateStore};
use crate::types::{ApplyResult, ExecuteOptions, OperationReport};
use crate::value::Reference;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::time::Duration;

/// What a converge call ended with
#[derive(Debug)]
pub enum Convergence {
    /// Dry run: the plan was computed and nothing was applied
    Planned(Plan),
    /// The confirmation callback declined the plan
    Declined(Plan),
    Applied { plan: Plan, result: ApplyResult },
}

/// Applies plans through a provider, recording results in a state store.
pub struct Executor<'a> {
    provider: &'a dyn ResourceProvider,
    store: &'a dyn StateStore,
    options: ExecuteOptions,
    cancel: CancellationToken,
}

impl<'a> Executor<'a> {
    pub fn new(provider: &'a dyn ResourceProvider, store: &'a dyn StateStore) -> Self {
        Self {
            provider,
            store,
            options: ExecuteOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Use `cancel` to stop the run from another thread.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Plan `graph` against the executor's state store.
    pub fn plan(&self, graph: &Graph) -> Result<Plan> {
        planner::plan(graph, self.store)
    }

    /// Plan, confirm and apply in one step.
    pub fn converge<P, C>(
        &self,
        graph: &Graph,
        progress: &mut P,
        confirm: &mut C,
    ) -> anyhow::Result<Convergence>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        let plan = self.plan(graph)?;

        if self.options.dry_run {
            return Ok(Convergence::Planned(plan));
        }

        // No-op plans still run so outputs are available to exports
        if plan.has_changes() && !confirm.confirm(&plan)? {
            return Ok(Convergence::Declined(plan));
        }

        let result = self.apply(graph, &plan, progress)?;
        Ok(Convergence::Applied { plan, result })
    }

    /// Apply `plan`, which must have been computed for `graph`.
    ///
    /// Operation failures are reported per node and never abort the run;
    /// the returned error covers only failures to run at all.
    pub fn apply<P: ProgressCallback>(
        &self,
        graph: &Graph,
        plan: &Plan,
        progress: &mut P,
    ) -> Result<ApplyResult> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.parallelism.max(1))
            .thread_name(|i| format!("apply-worker-{i}"))
            .build()?;

        log::info!(
            "applying {} operations with parallelism {}",
            plan.len(),
            self.options.parallelism.max(1)
        );

        let mut run = Run::new(graph, plan);
        progress.on_run_start(plan.len());

        let (sender, receiver) = mpsc::channel::<Event>();
        let retry = &self.options.retry;

        pool.in_place_scope(|scope| {
            let mut in_flight = 0usize;
            loop {
                while let Some(index) = run.next_ready() {
                    if self.cancel.is_cancelled() {
                        run.cancel(index, progress);
                        continue;
                    }
                    let Some(job) = run.prepare(index, progress) else {
                        continue;
                    };

                    progress.on_operation_start(&plan.operations[index]);
                    in_flight += 1;

                    let sender = sender.clone();
                    let provider = self.provider;
                    let store = self.store;
                    let cancel = self.cancel.clone();
                    scope.spawn(move |_| {
                        let callback = ChannelRetry {
                            index: job.index,
                            sender: sender.clone(),
                        };
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                            run_job(&job, provider, store, retry, &cancel, &callback)
                        }))
                        .unwrap_or_else(|_| Outcome::Failed {
                            error: Error::Provider(ProviderError::new(
                                ErrorCategory::Other,
                                "provider panicked",
                            )),
                            attempts: 1,
                        });
                        // The receiver outlives every worker
                        let _ = sender.send(Event::Finished {
                            index: job.index,
                            outcome,
                        });
                    });
                }

                if in_flight == 0 {
                    break;
                }

                match receiver.recv() {
                    Ok(Event::Retry {
                        index,
                        attempt,
                        error,
                        delay,
                    }) => {
                        let node_id = &plan.operations[index].node_id;
                        log::warn!("{node_id}: attempt {attempt} failed ({error}), retrying in {delay:?}");
                        progress.on_retry(node_id, attempt, &error, delay);
                    }
                    Ok(Event::Finished { index, outcome }) => {
                        in_flight -= 1;
                        run.complete(index, outcome, progress);
                    }
                    Err(_) => break,
                }
            }
        });

        run.cancel_leftovers(progress);
        progress.on_run_complete();

        let result = run.into_result();
        let summary = result.summary();
        log::info!(
            "apply finished: {} created, {} updated, {} deleted, {} unchanged, {} failed, {} blocked, {} cancelled",
            summary.created,
            summary.updated,
            summary.deleted,
            summary.unchanged,
            summary.failed,
            summary.blocked,
            summary.cancelled
        );
        Ok(result)
    }
}

/// Work handed to a pool thread
struct Job {
    index: usize,
    node_id: String,
    resource_type: String,
    kind: OperationKind,
    inputs: Inputs,
    prior: Option<StateRecord>,
    dependencies: Vec<String>,
}

enum Event {
    Retry {
        index: usize,
        attempt: u32,
        error: ProviderError,
        delay: Duration,
    },
    Finished {
        index: usize,
        outcome: Outcome,
    },
}

enum Outcome {
    Applied { outputs: Option<Outputs>, attempts: u32 },
    Failed { error: Error, attempts: u32 },
    Cancelled { error: ProviderError, attempts: u32 },
}

impl From<RetryError> for Outcome {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::Failed { error, attempts } => Outcome::Failed {
                error: Error::Provider(error),
                attempts,
            },
            RetryError::Cancelled { error, attempts } => Outcome::Cancelled { error, attempts },
        }
    }
}

struct ChannelRetry {
    index: usize,
    sender: Sender<Event>,
}

impl RetryCallback for ChannelRetry {
    fn on_retry(&self, attempt: u32, _max_attempts: u32, error: &ProviderError, delay: Duration) {
        let _ = self.sender.send(Event::Retry {
            index: self.index,
            attempt,
            error: error.clone(),
            delay,
        });
    }
}

fn run_job(
    job: &Job,
    provider: &dyn ResourceProvider,
    store: &dyn StateStore,
    retry: &RetryConfig,
    cancel: &CancellationToken,
    callback: &dyn RetryCallback,
) -> Outcome {
    if job.kind == OperationKind::Delete {
        let Some(prior) = &job.prior else {
            return Outcome::Failed {
                error: Error::state(format!("no state recorded for {}", job.node_id)),
                attempts: 0,
            };
        };
        let attempts = match with_retry(retry, cancel, Some(callback), || {
            provider.delete(&job.resource_type, prior)
        }) {
            Ok(((), attempts)) => attempts,
            Err(e) => return e.into(),
        };
        return match store.delete(&job.node_id) {
            Ok(()) => Outcome::Applied {
                outputs: None,
                attempts,
            },
            Err(error) => Outcome::Failed { error, attempts },
        };
    }

    let call = || match (job.kind, &job.prior) {
        (OperationKind::Update, Some(prior)) => {
            provider.update(&job.resource_type, &job.inputs, prior)
        }
        _ => provider.create(&job.resource_type, &job.inputs),
    };
    let (outputs, attempts) = match with_retry(retry, cancel, Some(callback), call) {
        Ok(done) => done,
        Err(e) => return e.into(),
    };

    let record = match (&job.prior, job.kind) {
        (Some(prior), OperationKind::Update) => prior.next(job.inputs.clone(), outputs.clone()),
        _ => StateRecord::new(
            &job.node_id,
            &job.resource_type,
            job.inputs.clone(),
            outputs.clone(),
        ),
    }
    .with_dependencies(job.dependencies.clone());

    match store.save(&job.node_id, &record) {
        Ok(()) => Outcome::Applied {
            outputs: Some(outputs),
            attempts,
        },
        Err(error) => Outcome::Failed { error, attempts },
    }
}

/// Scheduling state for one apply run
struct Run<'g> {
    graph: &'g Graph,
    plan: &'g Plan,
    /// Kind as executed, after no-op promotion
    kinds: Vec<OperationKind>,
    dependents: Vec<Vec<usize>>,
    remaining: Vec<usize>,
    status: Vec<NodeStatus>,
    inputs: Vec<Option<Inputs>>,
    reports: Vec<Option<OperationReport>>,
    outputs: BTreeMap<String, Outputs>,
    ready: BinaryHeap<Reverse<usize>>,
}

impl<'g> Run<'g> {
    fn new(graph: &'g Graph, plan: &'g Plan) -> Self {
        let waits = operation_dependencies(graph, plan);
        let count = plan.len();

        let mut dependents = vec![Vec::new(); count];
        for (index, deps) in waits.iter().enumerate() {
            for &d in deps {
                dependents[d].push(index);
            }
        }
        let remaining: Vec<usize> = waits.iter().map(Vec::len).collect();
        let ready = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        Self {
            graph,
            plan,
            kinds: plan.operations.iter().map(|op| op.kind).collect(),
            dependents,
            remaining,
            status: vec![NodeStatus::Planned; count],
            inputs: vec![None; count],
            reports: vec![None; count],
            outputs: BTreeMap::new(),
            ready,
        }
    }

    /// Lowest-index operation whose dependencies have all applied.
    fn next_ready(&mut self) -> Option<usize> {
        while let Some(Reverse(index)) = self.ready.pop() {
            if self.status[index] == NodeStatus::Planned {
                return Some(index);
            }
        }
        None
    }

    /// Resolve inputs and build the job for an operation.
    ///
    /// Returns `None` when the operation finished without a provider call.
    fn prepare<P: ProgressCallback>(&mut self, index: usize, progress: &mut P) -> Option<Job> {
        let (graph, plan) = (self.graph, self.plan);
        let op = &plan.operations[index];

        if op.kind == OperationKind::Delete {
            self.status[index] = NodeStatus::Applying;
            return Some(Job {
                index,
                node_id: op.node_id.clone(),
                resource_type: op.resource_type.clone(),
                kind: OperationKind::Delete,
                inputs: Inputs::new(),
                prior: plan.prior_record(&op.node_id).cloned(),
                dependencies: Vec::new(),
            });
        }

        let Some(node) = graph.get(&op.node_id) else {
            let error = Error::state(format!("{} is planned but not declared", op.node_id));
            self.fail(index, &error, 0, progress);
            return None;
        };

        let outputs = &self.outputs;
        let lookup = |r: &Reference| outputs.get(&r.node)?.get(&r.key).cloned();
        let inputs = match node.resolve_inputs(&lookup) {
            Ok(inputs) => inputs,
            Err(e) => {
                let error = e.into_error(&op.node_id);
                self.fail(index, &error, 0, progress);
                return None;
            }
        };
        self.inputs[index] = Some(inputs.clone());

        let prior = if op.replacement {
            None
        } else {
            plan.prior_record(&op.node_id).cloned()
        };

        let mut kind = op.kind;
        if kind == OperationKind::NoOp {
            match &prior {
                Some(record) if record.last_inputs == inputs => {
                    let mut report = self.report(index, NodeStatus::Applied);
                    report.resolved_inputs = Some(inputs);
                    self.outputs
                        .insert(op.node_id.clone(), record.last_outputs.clone());
                    self.finish(index, report, progress);
                    return None;
                }
                Some(_) => {
                    log::debug!("{}: upstream outputs changed, updating", op.node_id);
                    kind = OperationKind::Update;
                }
                None => kind = OperationKind::Create,
            }
        }
        if kind == OperationKind::Update && prior.is_none() {
            kind = OperationKind::Create;
        }
        self.kinds[index] = kind;
        self.status[index] = NodeStatus::Applying;

        Some(Job {
            index,
            node_id: op.node_id.clone(),
            resource_type: op.resource_type.clone(),
            kind,
            inputs,
            prior,
            dependencies: graph
                .dependencies(&op.node_id)
                .into_iter()
                .map(String::from)
                .collect(),
        })
    }

    fn complete<P: ProgressCallback>(&mut self, index: usize, outcome: Outcome, progress: &mut P) {
        match outcome {
            Outcome::Applied { outputs, attempts } => {
                let mut report = self.report(index, NodeStatus::Applied);
                report.attempts = attempts;
                report.resolved_inputs = self.inputs[index].clone();
                if let Some(outputs) = outputs {
                    self.outputs
                        .insert(self.plan.operations[index].node_id.clone(), outputs);
                }
                self.finish(index, report, progress);
            }
            Outcome::Failed { error, attempts } => self.fail(index, &error, attempts, progress),
            Outcome::Cancelled { error, attempts } => {
                let mut report = self.report(index, NodeStatus::Cancelled);
                report.attempts = attempts;
                report.error = Some(error.to_string());
                report.category = Some(error.category);
                self.finish(index, report, progress);
            }
        }
    }

    fn fail<P: ProgressCallback>(
        &mut self,
        index: usize,
        error: &Error,
        attempts: u32,
        progress: &mut P,
    ) {
        let mut report = self.report(index, NodeStatus::Failed);
        report.attempts = attempts;
        report.error = Some(error.to_string());
        report.resolved_inputs = self.inputs[index].clone();
        if let Error::Provider(e) = error {
            report.category = Some(e.category);
        }
        self.finish(index, report, progress);
    }

    fn cancel<P: ProgressCallback>(&mut self, index: usize, progress: &mut P) {
        let report = self.report(index, NodeStatus::Cancelled);
        self.finish(index, report, progress);
    }

    fn report(&self, index: usize, status: NodeStatus) -> OperationReport {
        let op = &self.plan.operations[index];
        OperationReport::new(&op.node_id, &op.resource_type, self.kinds[index], status)
    }

    fn finish<P: ProgressCallback>(
        &mut self,
        index: usize,
        report: OperationReport,
        progress: &mut P,
    ) {
        let status = report.status;
        match &report.error {
            Some(error) => log::info!("{} {}: {status} ({error})", report.kind, report.node_id),
            None => log::info!("{} {}: {status}", report.kind, report.node_id),
        }
        progress.on_operation_complete(&report);
        self.status[index] = status;
        self.reports[index] = Some(report);

        if status == NodeStatus::Applied {
            for &d in &self.dependents[index] {
                self.remaining[d] -= 1;
                if self.remaining[d] == 0 && self.status[d] == NodeStatus::Planned {
                    self.ready.push(Reverse(d));
                }
            }
        } else {
            self.block_dependents(index, progress);
        }
    }

    /// Mark everything downstream of a failed or cancelled operation.
    fn block_dependents<P: ProgressCallback>(&mut self, index: usize, progress: &mut P) {
        let cancelled = self.status[index] == NodeStatus::Cancelled;
        let origin = self.reports[index]
            .as_ref()
            .and_then(|r| r.blocked_by.clone())
            .unwrap_or_else(|| self.plan.operations[index].node_id.clone());

        let mut stack = self.dependents[index].clone();
        while let Some(d) = stack.pop() {
            if self.status[d] != NodeStatus::Planned {
                continue;
            }
            let report = if cancelled {
                self.report(d, NodeStatus::Cancelled)
            } else {
                let mut report = self.report(d, NodeStatus::Failed);
                report.error = Some(format!("blocked by failed {origin}"));
                report.blocked_by = Some(origin.clone());
                report
            };
            log::debug!("{}: {}", report.node_id, report.status);
            progress.on_operation_complete(&report);
            self.status[d] = report.status;
            self.reports[d] = Some(report);
            stack.extend(self.dependents[d].iter().copied());
        }
    }

    fn cancel_leftovers<P: ProgressCallback>(&mut self, progress: &mut P) {
        for index in 0..self.status.len() {
            if self.reports[index].is_none() {
                let report = self.report(index, NodeStatus::Cancelled);
                progress.on_operation_complete(&report);
                self.status[index] = NodeStatus::Cancelled;
                self.reports[index] = Some(report);
            }
        }
    }

    fn into_result(self) -> ApplyResult {
        ApplyResult {
            operations: self.reports.into_iter().flatten().collect(),
            outputs: self.outputs,
        }
    }
}

/// For each operation, the earlier operations it must wait for.
///
/// Creates and updates wait for their node's dependencies and for the
/// node's own replacement delete. Deletes wait for the deletes of resources
/// that depended on them, and a resource being removed outright also waits
/// for surviving former dependents to move off it.
fn operation_dependencies(graph: &Graph, plan: &Plan) -> Vec<Vec<usize>> {
    let mut forward: HashMap<&str, usize> = HashMap::new();
    let mut deletes: HashMap<&str, usize> = HashMap::new();
    for (index, op) in plan.operations.iter().enumerate() {
        let ops = if op.kind == OperationKind::Delete {
            &mut deletes
        } else {
            &mut forward
        };
        ops.entry(op.node_id.as_str()).or_insert(index);
    }

    plan.operations
        .iter()
        .enumerate()
        .map(|(index, op)| {
            let mut waits = BTreeSet::new();
            if op.kind == OperationKind::Delete {
                let removed = !graph.contains(&op.node_id);
                for (id, record) in plan.prior() {
                    if !record.dependencies.contains(&op.node_id) {
                        continue;
                    }
                    if let Some(&j) = deletes.get(id.as_str()) {
                        waits.insert(j);
                    }
                    if removed && let Some(&j) = forward.get(id.as_str()) {
                        waits.insert(j);
                    }
                }
            } else {
                for dep in graph.dependencies(&op.node_id) {
                    if let Some(&j) = forward.get(dep) {
                        waits.insert(j);
                    }
                }
                if let Some(&j) = deletes.get(op.node_id.as_str()) {
                    waits.insert(j);
                }
            }
            waits.into_iter().filter(|&j| j < index).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AutoConfirm, AutoDecline, NoProgress};
    use crate::graph::build;
    use crate::node::ResourceNode;
    use crate::state::MemoryStateStore;
    use crate::value::AttrValue;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider whose outputs echo inputs plus an `id` of `<type>/<name>`.
    #[derive(Default)]
    struct FakeProvider {
        calls: Mutex<Vec<String>>,
        failures: Mutex<HashMap<String, VecDeque<ProviderError>>>,
        panic_on: Option<String>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeProvider {
        fn failing(self, name: &str, errors: Vec<ProviderError>) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(name.to_string(), errors.into());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn call(&self, op: &str, name: &str) -> std::result::Result<(), ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push(format!("{op}:{name}"));
            if self.panic_on.as_deref() == Some(name) {
                panic!("boom");
            }
            match self.failures.lock().unwrap().get_mut(name).and_then(VecDeque::pop_front) {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }

        fn outputs(resource_type: &str, inputs: &Inputs) -> Outputs {
            let name = inputs.get("name").and_then(Value::as_str).unwrap_or("?");
            let mut out = inputs.clone();
            out.insert("id".into(), json!(format!("{resource_type}/{name}")));
            out
        }
    }

    impl ResourceProvider for FakeProvider {
        fn create(
            &self,
            resource_type: &str,
            inputs: &Inputs,
        ) -> std::result::Result<Outputs, ProviderError> {
            let name = inputs.get("name").and_then(Value::as_str).unwrap_or("?");
            self.call("create", name)?;
            Ok(Self::outputs(resource_type, inputs))
        }

        fn update(
            &self,
            resource_type: &str,
            inputs: &Inputs,
            _prior: &StateRecord,
        ) -> std::result::Result<Outputs, ProviderError> {
            let name = inputs.get("name").and_then(Value::as_str).unwrap_or("?");
            self.call("update", name)?;
            Ok(Self::outputs(resource_type, inputs))
        }

        fn delete(
            &self,
            _resource_type: &str,
            prior: &StateRecord,
        ) -> std::result::Result<(), ProviderError> {
            self.call("delete", &prior.node_id)
        }
    }

    /// Store that refuses to save one node.
    struct RefusingStore {
        inner: MemoryStateStore,
        refuse: String,
    }

    impl StateStore for RefusingStore {
        fn load(&self) -> Result<BTreeMap<String, StateRecord>> {
            self.inner.load()
        }

        fn save(&self, node_id: &str, record: &StateRecord) -> Result<()> {
            if node_id == self.refuse {
                return Err(Error::state("disk full"));
            }
            self.inner.save(node_id, record)
        }

        fn delete(&self, node_id: &str) -> Result<()> {
            self.inner.delete(node_id)
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        started: Vec<String>,
        retries: Vec<(String, u32)>,
        completed: Vec<(String, NodeStatus)>,
        finished: bool,
    }

    impl ProgressCallback for RecordingProgress {
        fn on_run_start(&mut self, _total: usize) {}

        fn on_operation_start(&mut self, operation: &crate::planner::Operation) {
            self.started.push(operation.node_id.clone());
        }

        fn on_retry(
            &mut self,
            node_id: &str,
            attempt: u32,
            _error: &ProviderError,
            _delay: Duration,
        ) {
            self.retries.push((node_id.to_string(), attempt));
        }

        fn on_operation_complete(&mut self, report: &OperationReport) {
            self.completed.push((report.node_id.clone(), report.status));
        }

        fn on_run_complete(&mut self) {
            self.finished = true;
        }
    }

    fn node(id: &str) -> ResourceNode {
        ResourceNode::new(id, "test:thing").literal("name", id)
    }

    fn fast_options(parallelism: usize) -> ExecuteOptions {
        ExecuteOptions {
            dry_run: false,
            parallelism,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 2.0,
                max_delay: Duration::from_millis(5),
            },
        }
    }

    fn apply(
        provider: &FakeProvider,
        store: &dyn StateStore,
        graph: &Graph,
    ) -> (Plan, ApplyResult) {
        let executor = Executor::new(provider, store).options(fast_options(4));
        let plan = executor.plan(graph).unwrap();
        let result = executor.apply(graph, &plan, &mut NoProgress).unwrap();
        (plan, result)
    }

    /// a <- b <- c, plus an independent d
    fn chain() -> Graph {
        build(vec![
            node("a"),
            node("b").input("parent", AttrValue::reference("a", "id")),
            node("c").input("parent", AttrValue::reference("b", "id")),
            node("d"),
        ])
        .unwrap()
    }

    fn secret_graph() -> Graph {
        build(vec![
            node("secret").literal("secretId", "config"),
            node("secret-version")
                .input("secret", AttrValue::reference("secret", "id"))
                .literal("secretData", "{\"port\":8080}"),
        ])
        .unwrap()
    }

    #[test]
    fn test_apply_resolves_references_and_records_state() {
        let provider = FakeProvider::default();
        let store = MemoryStateStore::new();

        let (_, result) = apply(&provider, &store, &secret_graph());
        assert!(result.is_success());
        assert_eq!(provider.calls(), vec!["create:secret", "create:secret-version"]);
        assert_eq!(
            result.resolved_inputs("secret-version").unwrap()["secret"],
            json!("test:thing/secret")
        );

        let records = store.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records["secret-version"].version, 1);
        assert_eq!(records["secret-version"].dependencies, vec!["secret"]);
        assert_eq!(
            records["secret-version"].last_inputs["secret"],
            json!("test:thing/secret")
        );
    }

    #[test]
    fn test_second_apply_is_noop() {
        let provider = FakeProvider::default();
        let store = MemoryStateStore::new();
        let graph = secret_graph();
        apply(&provider, &store, &graph);

        let (plan, result) = apply(&provider, &store, &graph);
        assert!(!plan.has_changes());
        assert_eq!(provider.calls().len(), 2);
        assert_eq!(result.summary().unchanged, 2);
        assert_eq!(
            result.outputs_of("secret").unwrap()["id"],
            json!("test:thing/secret")
        );
        assert_eq!(store.load().unwrap()["secret"].version, 1);
    }

    #[test]
    fn test_failure_is_contained() {
        let provider = FakeProvider::default().failing(
            "b",
            vec![ProviderError::new(ErrorCategory::PermissionDenied, "denied")],
        );
        let store = MemoryStateStore::new();

        let (_, result) = apply(&provider, &store, &chain());
        assert_eq!(result.status("a"), Some(NodeStatus::Applied));
        assert_eq!(result.status("b"), Some(NodeStatus::Failed));
        assert_eq!(result.status("c"), Some(NodeStatus::Failed));
        assert_eq!(result.status("d"), Some(NodeStatus::Applied));
        assert_eq!(result.report("c").unwrap().blocked_by.as_deref(), Some("b"));
        assert_eq!(
            result.report("b").unwrap().category,
            Some(ErrorCategory::PermissionDenied)
        );
        assert!(!provider.calls().contains(&"create:c".to_string()));

        let records = store.load().unwrap();
        assert_eq!(records.keys().collect::<Vec<_>>(), vec!["a", "d"]);

        let failures = result.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].blocked, vec!["c"]);
    }

    #[test]
    fn test_retryable_error_is_retried() {
        let provider = FakeProvider::default().failing(
            "b",
            vec![
                ProviderError::transient("connection reset"),
                ProviderError::new(ErrorCategory::RateLimit, "429"),
            ],
        );
        let store = MemoryStateStore::new();
        let graph = chain();
        let executor = Executor::new(&provider, &store).options(fast_options(2));
        let plan = executor.plan(&graph).unwrap();
        let mut progress = RecordingProgress::default();

        let result = executor.apply(&graph, &plan, &mut progress).unwrap();
        assert!(result.is_success());
        assert_eq!(result.report("b").unwrap().attempts, 3);
        assert_eq!(
            progress.retries,
            vec![("b".to_string(), 1), ("b".to_string(), 2)]
        );
        assert!(progress.finished);
    }

    #[test]
    fn test_terminal_error_is_not_retried() {
        let provider = FakeProvider::default()
            .failing("a", vec![ProviderError::invalid("bad region")]);
        let store = MemoryStateStore::new();

        let (_, result) = apply(&provider, &store, &chain());
        let report = result.report("a").unwrap();
        assert_eq!(report.status, NodeStatus::Failed);
        assert_eq!(report.attempts, 1);
        assert_eq!(
            provider.calls().iter().filter(|c| *c == "create:a").count(),
            1
        );
    }

    #[test]
    fn test_retries_exhausted() {
        let provider = FakeProvider::default()
            .failing("d", (0..5).map(|_| ProviderError::transient("timeout")).collect());
        let store = MemoryStateStore::new();

        let (_, result) = apply(&provider, &store, &chain());
        assert_eq!(result.status("d"), Some(NodeStatus::Failed));
        assert_eq!(result.report("d").unwrap().attempts, 3);
        assert_eq!(result.status("c"), Some(NodeStatus::Applied));
    }

    #[test]
    fn test_unresolved_reference_fails_without_provider_call() {
        let graph = build(vec![
            node("a"),
            node("b").input("token", AttrValue::reference("a", "missing")),
        ])
        .unwrap();
        let provider = FakeProvider::default();
        let store = MemoryStateStore::new();

        let (_, result) = apply(&provider, &store, &graph);
        let report = result.report("b").unwrap();
        assert_eq!(report.status, NodeStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("a.missing"));
        assert_eq!(provider.calls(), vec!["create:a"]);
    }

    #[test]
    fn test_state_store_failure_fails_node() {
        let provider = FakeProvider::default();
        let store = RefusingStore {
            inner: MemoryStateStore::new(),
            refuse: "b".into(),
        };

        let (_, result) = apply(&provider, &store, &chain());
        assert_eq!(result.status("b"), Some(NodeStatus::Failed));
        assert!(result.report("b").unwrap().error.as_deref().unwrap().contains("disk full"));
        assert_eq!(result.report("c").unwrap().blocked_by.as_deref(), Some("b"));
        assert!(!store.load().unwrap().contains_key("b"));
    }

    #[test]
    fn test_provider_panic_is_contained() {
        let provider = FakeProvider {
            panic_on: Some("a".into()),
            ..Default::default()
        };
        let store = MemoryStateStore::new();

        let (_, result) = apply(&provider, &store, &chain());
        assert_eq!(result.status("a"), Some(NodeStatus::Failed));
        assert_eq!(result.status("b"), Some(NodeStatus::Failed));
        assert_eq!(result.status("d"), Some(NodeStatus::Applied));
    }

    #[test]
    fn test_cancelled_before_start() {
        let provider = FakeProvider::default();
        let store = MemoryStateStore::new();
        let graph = chain();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let executor = Executor::new(&provider, &store).cancellation(cancel);
        let plan = executor.plan(&graph).unwrap();
        let result = executor.apply(&graph, &plan, &mut NoProgress).unwrap();

        assert!(provider.calls().is_empty());
        assert_eq!(result.summary().cancelled, 4);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_during_backoff() {
        let provider = FakeProvider::default()
            .failing("a", vec![ProviderError::transient("timeout")]);
        let store = MemoryStateStore::new();
        let graph = chain();
        let cancel = CancellationToken::new();

        let mut options = fast_options(1);
        options.retry.base_delay = Duration::from_secs(60);
        options.retry.max_delay = Duration::from_secs(60);
        let executor = Executor::new(&provider, &store)
            .options(options)
            .cancellation(cancel.clone());
        let plan = executor.plan(&graph).unwrap();

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });
        let result = executor.apply(&graph, &plan, &mut NoProgress).unwrap();
        canceller.join().unwrap();

        let a = result.report("a").unwrap();
        assert_eq!(a.status, NodeStatus::Cancelled);
        assert_eq!(a.attempts, 1);
        assert_eq!(result.status("b"), Some(NodeStatus::Cancelled));
        assert_eq!(result.status("c"), Some(NodeStatus::Cancelled));
    }

    #[test]
    fn test_parallelism_is_bounded() {
        let provider = FakeProvider {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let store = MemoryStateStore::new();
        let graph = build((0..8).map(|i| node(&format!("n{i}")))).unwrap();

        let executor = Executor::new(&provider, &store).options(fast_options(2));
        let plan = executor.plan(&graph).unwrap();
        let result = executor.apply(&graph, &plan, &mut NoProgress).unwrap();

        assert_eq!(result.summary().created, 8);
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_noop_promoted_when_upstream_outputs_change() {
        let provider = FakeProvider::default();
        let store = MemoryStateStore::new();
        let graph = build(vec![
            node("a").literal("size", 2),
            node("b").input("parent", AttrValue::reference("a", "id")),
        ])
        .unwrap();

        // Prior apply recorded a different id for `a`
        let stale = |v: Value| serde_json::from_value::<Inputs>(v).unwrap();
        store
            .save(
                "a",
                &StateRecord::new(
                    "a",
                    "test:thing",
                    stale(json!({ "name": "a", "size": 1 })),
                    stale(json!({ "id": "legacy-a" })),
                ),
            )
            .unwrap();
        store
            .save(
                "b",
                &StateRecord::new(
                    "b",
                    "test:thing",
                    stale(json!({ "name": "b", "parent": "legacy-a" })),
                    stale(json!({ "id": "legacy-b" })),
                )
                .with_dependencies(vec!["a".into()]),
            )
            .unwrap();

        let (plan, result) = apply(&provider, &store, &graph);
        assert_eq!(plan.operations[1].kind, OperationKind::NoOp);
        assert_eq!(result.report("b").unwrap().kind, OperationKind::Update);
        assert_eq!(provider.calls(), vec!["update:a", "update:b"]);
        assert_eq!(store.load().unwrap()["b"].version, 2);
    }

    #[test]
    fn test_removed_nodes_are_deleted_dependents_first() {
        let provider = FakeProvider::default();
        let store = MemoryStateStore::new();
        apply(&provider, &store, &chain());

        let reduced = build(vec![node("a"), node("d")]).unwrap();
        let (_, result) = apply(&provider, &store, &reduced);

        assert!(result.is_success());
        let calls = provider.calls();
        assert_eq!(&calls[4..], &["delete:c", "delete:b"]);
        assert_eq!(
            store.load().unwrap().keys().collect::<Vec<_>>(),
            vec!["a", "d"]
        );
    }

    #[test]
    fn test_failed_delete_blocks_dependency_delete() {
        let provider = FakeProvider::default();
        let store = MemoryStateStore::new();
        apply(&provider, &store, &chain());

        let provider = FakeProvider::default()
            .failing("c", vec![ProviderError::new(ErrorCategory::NotFound, "gone")]);
        let reduced = build(vec![node("a"), node("d")]).unwrap();
        let (_, result) = apply(&provider, &store, &reduced);

        assert_eq!(result.status("c"), Some(NodeStatus::Failed));
        assert_eq!(result.report("b").unwrap().blocked_by.as_deref(), Some("c"));
        assert!(store.load().unwrap().contains_key("b"));
    }

    #[test]
    fn test_type_change_replaces_resource() {
        let provider = FakeProvider::default();
        let store = MemoryStateStore::new();
        apply(&provider, &store, &secret_graph());

        let graph = build(vec![
            ResourceNode::new("secret", "test:other")
                .literal("name", "secret")
                .literal("secretId", "config"),
            node("secret-version")
                .input("secret", AttrValue::reference("secret", "id"))
                .literal("secretData", "{\"port\":8080}"),
        ])
        .unwrap();
        let (_, result) = apply(&provider, &store, &graph);

        assert!(result.is_success());
        assert_eq!(
            &provider.calls()[2..],
            &["delete:secret", "create:secret", "update:secret-version"]
        );
        let records = store.load().unwrap();
        assert_eq!(records["secret"].resource_type, "test:other");
        assert_eq!(records["secret"].version, 1);
        assert_eq!(
            records["secret-version"].last_inputs["secret"],
            json!("test:other/secret")
        );
    }

    #[test]
    fn test_converge_dry_run_and_decline() {
        let provider = FakeProvider::default();
        let store = MemoryStateStore::new();
        let graph = secret_graph();

        let dry = Executor::new(&provider, &store).options(ExecuteOptions {
            dry_run: true,
            ..fast_options(1)
        });
        let outcome = dry.converge(&graph, &mut NoProgress, &mut AutoConfirm).unwrap();
        assert!(matches!(outcome, Convergence::Planned(ref plan) if plan.len() == 2));

        let executor = Executor::new(&provider, &store).options(fast_options(1));
        let outcome = executor
            .converge(&graph, &mut NoProgress, &mut AutoDecline)
            .unwrap();
        assert!(matches!(outcome, Convergence::Declined(_)));
        assert!(provider.calls().is_empty());

        let outcome = executor
            .converge(&graph, &mut NoProgress, &mut AutoConfirm)
            .unwrap();
        match outcome {
            Convergence::Applied { result, .. } => assert_eq!(result.summary().created, 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_operation_dependencies_only_point_backwards() {
        let plan = planner::plan_with_state(&chain(), BTreeMap::new());
        let waits = operation_dependencies(&chain(), &plan);
        for (index, deps) in waits.iter().enumerate() {
            assert!(deps.iter().all(|&d| d < index));
        }
        let c = plan.position("c", OperationKind::Create).unwrap();
        let b = plan.position("b", OperationKind::Create).unwrap();
        assert_eq!(waits[c], vec![b]);
    }

    #[test]
    fn test_removed_node_delete_waits_for_survivor_ahead_of_replacement() {
        let graph = build(vec![
            ResourceNode::new("bucket", "random:string"),
            ResourceNode::new("binding", "core:data").literal("role", "viewer"),
        ])
        .unwrap();
        let record = |id: &str, deps: &[&str]| {
            StateRecord::new(id, "core:data", Inputs::new(), Outputs::new())
                .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
        };
        let prior = BTreeMap::from([
            ("bucket".to_string(), record("bucket", &[])),
            ("policy".to_string(), record("policy", &["bucket"])),
            ("binding".to_string(), record("binding", &["policy"])),
        ]);

        let plan = planner::plan_with_state(&graph, prior);
        let waits = operation_dependencies(&graph, &plan);
        let binding = plan.position("binding", OperationKind::Update).unwrap();
        let policy = plan.position("policy", OperationKind::Delete).unwrap();
        let bucket_delete = plan.position("bucket", OperationKind::Delete).unwrap();
        let bucket_create = plan.position("bucket", OperationKind::Create).unwrap();

        assert_eq!(waits[policy], vec![binding]);
        assert_eq!(waits[bucket_delete], vec![policy]);
        assert_eq!(waits[bucket_create], vec![bucket_delete]);
    }
}
