//! Context Module Tests
//!
//! ## Test Scopes
//! - **CommandQueue**: FIFO order, priority insertion, tokens, attempts and cancellation.
//! - **ContextRecord**: buffering before registration, commit and rollback.
//! - **ContextExecutor**: full turns against a real store, including functor results.

#[cfg(test)]
mod tests {
    use crate::codec::Codec;
    use crate::command::pattern::{Command, Functor, Priority};
    use crate::command::registry::CommandRegistry;
    use crate::command::types::{
        CommandEnvelope, ContextId, EnvelopeKind, ResultId, SubmissionKey, SubmissionKeyPair, SubmissionState,
        SubmitterId,
    };
    use crate::context::environment::ExecutionEnvironment;
    use crate::context::executor::ContextExecutor;
    use crate::context::types::{
        CommandQueue, ContextRecord, ManagementStrategy, QueueTurn, QueuedCommand, RECENT_OUTCOMES, TurnEnd, TurnStart,
    };
    use crate::functor::publisher::ResultPublisher;
    use crate::functor::types::{FunctorOutcome, FunctorResult};
    use crate::membership::service::MembershipService;
    use crate::membership::types::NodeId;
    use crate::storage::memory::DistributedMap;
    use crate::storage::partitioner::PartitionManager;

    use anyhow::bail;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Push(i64);

    impl Command<Vec<i64>> for Push {
        const NAME: &'static str = "push";

        fn execute(&self, env: &mut ExecutionEnvironment<Vec<i64>>) -> anyhow::Result<()> {
            env.context_mut().push(self.0);
            Ok(())
        }
    }

    /// Mutates the working copy, then fails.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PushThenFail;

    impl Command<Vec<i64>> for PushThenFail {
        const NAME: &'static str = "push_then_fail";

        fn execute(&self, env: &mut ExecutionEnvironment<Vec<i64>>) -> anyhow::Result<()> {
            env.context_mut().push(-1);
            bail!("rejected after mutating")
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Length;

    impl Functor<Vec<i64>> for Length {
        const NAME: &'static str = "length";
        type Output = usize;

        fn execute(&self, env: &mut ExecutionEnvironment<Vec<i64>>) -> anyhow::Result<usize> {
            Ok(env.context().len())
        }
    }

    fn envelope(name: &str, priority: bool) -> CommandEnvelope {
        CommandEnvelope {
            name: name.to_string(),
            payload: Vec::new(),
            priority,
            kind: EnvelopeKind::Command,
        }
    }

    fn queued(queue: &mut CommandQueue, ctx: &ContextId, priority: bool) -> SubmissionKey {
        let key = queue.allocate_key(ctx);
        queue.push(QueuedCommand {
            key: key.clone(),
            envelope: envelope("noop", priority),
        });
        key
    }

    fn run_key(turn: QueueTurn) -> (SubmissionKey, u64, bool) {
        match turn {
            QueueTurn::Run {
                command,
                attempt,
                recovered,
            } => (command.key, attempt, recovered),
            other => panic!("expected a runnable turn, got {:?}", other),
        }
    }

    // ============================================================
    // COMMAND QUEUE
    // ============================================================

    #[test]
    fn test_sequences_start_at_one_and_increase() {
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();

        let first = queue.allocate_key(&ctx);
        let second = queue.allocate_key(&ctx);

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.context_id, ctx);
    }

    #[test]
    fn test_priority_goes_ahead_of_queued_work() {
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();

        let a = queued(&mut queue, &ctx, false);
        let b = queued(&mut queue, &ctx, false);
        let p = queued(&mut queue, &ctx, true);

        assert_eq!(queue.pending_keys(), vec![p, a, b]);
    }

    #[test]
    fn test_priority_does_not_preempt_executing_command() {
        // ARRANGE: start `a` so it is executing
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();
        let a = queued(&mut queue, &ctx, false);
        let b = queued(&mut queue, &ctx, false);
        let token = queue.schedule().unwrap();
        let (running, attempt, _) = run_key(queue.begin(&token.key));
        assert_eq!(running, a);

        // ACT: a priority command arrives mid-execution
        let p = queued(&mut queue, &ctx, true);

        // ASSERT: `a` keeps running; `p` runs next, before `b`
        assert_eq!(queue.executing().map(|c| c.key.clone()), Some(a.clone()));
        assert_eq!(queue.state_of(&a), Some(SubmissionState::Executing));
        let end = queue.finish(&a, attempt, true);
        assert_eq!(
            end,
            TurnEnd::Committed {
                follow_up: Some(SubmissionKeyPair::new(p.clone(), None))
            }
        );
        assert_eq!(queue.pending_keys(), vec![p, b]);
    }

    #[test]
    fn test_only_one_token_is_outstanding() {
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();
        queued(&mut queue, &ctx, false);

        assert!(queue.schedule().is_some());
        queued(&mut queue, &ctx, false);
        assert!(queue.schedule().is_none(), "second token must not be issued");
    }

    #[test]
    fn test_stale_token_is_refused() {
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();
        queued(&mut queue, &ctx, false);
        queue.schedule().unwrap();

        let bogus = SubmissionKey::new(ctx, 42);
        assert_eq!(queue.begin(&bogus), QueueTurn::Stale);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_empty_queue_releases_token() {
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();
        let a = queued(&mut queue, &ctx, false);
        let token = queue.schedule().unwrap();

        // The only command is cancelled before its turn starts.
        assert!(queue.cancel(&a).is_some());
        assert_eq!(queue.begin(&token.key), QueueTurn::Idle);
        assert!(queue.token().is_none());

        // New work gets a fresh token.
        let b = queued(&mut queue, &ctx, false);
        assert_eq!(queue.schedule().map(|pair| pair.key), Some(b));
    }

    #[test]
    fn test_resumed_attempt_supersedes_interrupted_one() {
        // ARRANGE: attempt 1 starts and never finishes
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();
        let a = queued(&mut queue, &ctx, false);
        let token = queue.schedule().unwrap();
        let (_, first_attempt, recovered) = run_key(queue.begin(&token.key));
        assert!(!recovered);

        // ACT: the same token is presented again by an adopting worker
        let (resumed, second_attempt, recovered) = run_key(queue.begin(&token.key));

        // ASSERT: same command, flagged as recovered, and only the newest attempt commits
        assert_eq!(resumed, a);
        assert!(recovered);
        assert!(second_attempt > first_attempt);
        assert_eq!(queue.finish(&a, first_attempt, true), TurnEnd::Stale);
        assert_eq!(queue.finish(&a, second_attempt, true), TurnEnd::Committed { follow_up: None });
        assert_eq!(queue.executed(), 1);
        assert_eq!(queue.state_of(&a), Some(SubmissionState::Succeeded));
    }

    #[test]
    fn test_cancel_only_before_start() {
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();
        let a = queued(&mut queue, &ctx, false);
        let b = queued(&mut queue, &ctx, false);
        let token = queue.schedule().unwrap();

        assert_eq!(queue.state_of(&a), Some(SubmissionState::Assigned));
        assert_eq!(queue.state_of(&b), Some(SubmissionState::Queued));

        run_key(queue.begin(&token.key));
        assert!(queue.cancel(&a).is_none(), "executing command cannot be cancelled");
        assert!(queue.cancel(&b).is_some());
        assert!(queue.cancel(&b).is_none(), "second cancel is a no-op");
        assert_eq!(queue.state_of(&b), Some(SubmissionState::Cancelled));
    }

    #[test]
    fn test_cancel_follows_submission_state_transitions() {
        // ARRANGE: a runs to completion, b holds the token, c waits behind it
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();
        let a = queued(&mut queue, &ctx, false);
        let b = queued(&mut queue, &ctx, false);
        let c = queued(&mut queue, &ctx, false);
        let token = queue.schedule().unwrap();
        let (_, attempt, _) = run_key(queue.begin(&token.key));
        let follow_up = match queue.finish(&a, attempt, true) {
            TurnEnd::Committed { follow_up } => follow_up.unwrap(),
            TurnEnd::Stale => panic!("first attempt should commit"),
        };
        assert_eq!(follow_up.key, b);
        assert_eq!(queue.state_of(&b), Some(SubmissionState::Assigned));

        // ACT & ASSERT: a finished submission stays finished
        assert!(queue.cancel(&a).is_none());
        assert_eq!(queue.state_of(&a), Some(SubmissionState::Succeeded));

        // ACT & ASSERT: the assigned head can still be cancelled
        assert!(queue.cancel(&b).is_some());
        assert_eq!(queue.state_of(&b), Some(SubmissionState::Cancelled));

        // ACT & ASSERT: once c is executing, cancel leaves it alone
        let (running, _, _) = run_key(queue.begin(&follow_up.key));
        assert_eq!(running, c);
        assert!(queue.cancel(&c).is_none());
        assert_eq!(queue.state_of(&c), Some(SubmissionState::Executing));

        // ACT & ASSERT: unknown keys are not cancelled
        assert!(queue.cancel(&SubmissionKey::new(ctx.clone(), 99)).is_none());
    }

    #[test]
    fn test_recent_outcomes_are_bounded() {
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();
        let mut keys = Vec::new();
        for _ in 0..RECENT_OUTCOMES + 10 {
            let key = queued(&mut queue, &ctx, false);
            queue.cancel(&key);
            keys.push(key);
        }

        assert_eq!(queue.state_of(&keys[0]), None);
        assert_eq!(queue.state_of(keys.last().unwrap()), Some(SubmissionState::Cancelled));
    }

    #[test]
    fn test_drain_returns_executing_and_pending() {
        let ctx = ContextId::from("c");
        let mut queue = CommandQueue::default();
        let a = queued(&mut queue, &ctx, false);
        let b = queued(&mut queue, &ctx, false);
        let token = queue.schedule().unwrap();
        run_key(queue.begin(&token.key));

        let drained: Vec<_> = queue.drain().into_iter().map(|c| c.key).collect();

        assert_eq!(drained, vec![a, b]);
        assert!(queue.is_idle());
        assert!(queue.token().is_none());
    }

    // ============================================================
    // CONTEXT RECORD
    // ============================================================

    #[test]
    fn test_buffered_record_holds_work_until_registered() {
        let ctx = ContextId::from("later");
        let mut record: ContextRecord<i64> =
            ContextRecord::buffered(ctx.clone(), ManagementStrategy::Distributed, NodeId("n".into()));

        let (key, dispatch) = record.submit(envelope("noop", false));
        assert!(dispatch.is_none());
        assert!(!record.is_registered());
        assert!(matches!(record.begin_turn(&key), TurnStart::Stale));

        let dispatch = record.register(7);
        assert_eq!(dispatch.map(|pair| pair.key), Some(key));
        assert_eq!(record.value, Some(7));
    }

    #[test]
    fn test_failed_turn_keeps_previous_value() {
        let mut record = ContextRecord::new(
            ContextId::from("c"),
            10i64,
            ManagementStrategy::Distributed,
            NodeId("n".into()),
        );
        let (key, token) = record.submit(envelope("noop", false));
        let token = token.unwrap();

        let TurnStart::Run(turn) = record.begin_turn(&token.key) else {
            panic!("turn should start");
        };
        assert_eq!(turn.snapshot, 10);

        let end = record.finish_turn(&key, turn.attempt, None);

        assert_eq!(end, TurnEnd::Committed { follow_up: None });
        assert_eq!(record.value, Some(10));
        assert_eq!(record.queue.state_of(&key), Some(SubmissionState::Failed));
    }

    // ============================================================
    // CONTEXT EXECUTOR
    // ============================================================

    struct Fixture {
        local: NodeId,
        contexts: Arc<DistributedMap<ContextId, ContextRecord<Vec<i64>>>>,
        results: Arc<DistributedMap<ResultId, FunctorResult>>,
        registry: Arc<CommandRegistry<Vec<i64>>>,
        executor: Arc<ContextExecutor<Vec<i64>>>,
    }

    async fn fixture() -> Fixture {
        let membership = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();
        let partitioner = Arc::new(PartitionManager::new(membership.clone()));
        let contexts = Arc::new(DistributedMap::new_with_base(
            membership.clone(),
            partitioner.clone(),
            "/contexts",
        ));
        let results = Arc::new(DistributedMap::new_with_base(
            membership.clone(),
            partitioner,
            "/results",
        ));

        let registry = CommandRegistry::new(Codec::Json);
        registry.register_command::<Push>();
        registry.register_command::<PushThenFail>();
        registry.register_functor::<Length>();

        let publisher = ResultPublisher::new(membership.clone(), results.clone());
        let executor = ContextExecutor::new(contexts.clone(), registry.clone(), publisher);

        Fixture {
            local: membership.local_id().clone(),
            contexts,
            results,
            registry,
            executor,
        }
    }

    impl Fixture {
        fn create(&self, id: &str, value: Vec<i64>) -> ContextId {
            let ctx = ContextId::from(id);
            let record = ContextRecord::new(ctx.clone(), value, ManagementStrategy::Distributed, self.local.clone());
            self.contexts.store_local(ctx.clone(), record);
            ctx
        }

        fn submit(&self, ctx: &ContextId, envelope: CommandEnvelope) -> Option<SubmissionKeyPair> {
            self.contexts
                .invoke(ctx, |slot| slot.as_mut().and_then(|record| record.submit(envelope).1))
        }

        /// Runs turns until the context has nothing left.
        async fn run_to_idle(&self, mut token: Option<SubmissionKeyPair>) -> usize {
            let mut turns = 0;
            while let Some(current) = token {
                let outcome = self.executor.clone().run_turn(current).await;
                token = outcome.follow_up;
                turns += 1;
            }
            turns
        }

        fn value(&self, ctx: &ContextId) -> Vec<i64> {
            self.contexts
                .inspect_local(ctx, |record| record.value.clone())
                .flatten()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_turns_apply_commands_in_order_with_priority() {
        // ARRANGE
        let fx = fixture().await;
        let ctx = fx.create("ordered", vec![]);

        let token = fx.submit(&ctx, fx.registry.command_envelope(&Push(1)).unwrap());
        fx.submit(&ctx, fx.registry.command_envelope(&Push(2)).unwrap());
        fx.submit(&ctx, fx.registry.command_envelope(&Priority(Push(3))).unwrap());

        // ACT
        let turns = fx.run_to_idle(token).await;

        // ASSERT: nothing had started, so the priority command ran first
        assert_eq!(turns, 3);
        assert_eq!(fx.value(&ctx), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_failing_command_is_rolled_back_and_skipped() {
        let fx = fixture().await;
        let ctx = fx.create("rollback", vec![5]);

        let token = fx.submit(&ctx, fx.registry.command_envelope(&PushThenFail).unwrap());
        fx.submit(&ctx, fx.registry.command_envelope(&Push(6)).unwrap());

        let first = fx.executor.clone().run_turn(token.unwrap()).await;
        assert!(!first.succeeded);
        assert_eq!(fx.value(&ctx), vec![5], "failed command must not leak changes");

        fx.run_to_idle(first.follow_up).await;
        assert_eq!(fx.value(&ctx), vec![5, 6]);
    }

    #[tokio::test]
    async fn test_functor_turn_publishes_result() {
        // ARRANGE
        let fx = fixture().await;
        let ctx = fx.create("measured", vec![1, 2, 3]);
        let result_id = ResultId::new();
        let submitter = SubmitterId::new();
        let functor = fx
            .registry
            .functor_envelope(&Length, result_id.clone(), submitter.clone(), fx.local.clone())
            .unwrap();

        // ACT
        let token = fx.submit(&ctx, functor);
        fx.run_to_idle(token).await;

        // ASSERT
        let stored = fx.results.get_local(&result_id).expect("result stored");
        assert!(stored.complete);
        assert_eq!(stored.submitter_id, submitter);
        assert_eq!(stored.outcome, Some(FunctorOutcome::Value(Codec::Json.encode(&3usize).unwrap())));
    }

    #[tokio::test]
    async fn test_stale_token_runs_nothing() {
        let fx = fixture().await;
        let ctx = fx.create("stale", vec![]);
        fx.submit(&ctx, fx.registry.command_envelope(&Push(1)).unwrap());

        let bogus = SubmissionKeyPair::new(SubmissionKey::new(ctx.clone(), 99), None);
        let outcome = fx.executor.clone().run_turn(bogus).await;

        assert!(outcome.follow_up.is_none());
        assert_eq!(fx.value(&ctx), Vec::<i64>::new());
    }
}
