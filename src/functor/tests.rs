//! Functor Module Tests
//!
//! ## Test Scopes
//! - **Result Store**: first completion wins.
//! - **Delivery**: one resolution per result, removal after consumption, submitter filtering.
//! - **Futures**: decoding, failure mapping, timeouts, shared reads.

#[cfg(test)]
mod tests {
    use crate::codec::Codec;
    use crate::command::types::{ContextId, ResultId, SubmissionKey, SubmitterId};
    use crate::error::EngineError;
    use crate::functor::delivery::ResultDelivery;
    use crate::functor::future::FunctorFuture;
    use crate::functor::publisher::ResultPublisher;
    use crate::functor::types::{FunctorOutcome, FunctorResult};
    use crate::membership::service::MembershipService;
    use crate::storage::memory::DistributedMap;
    use crate::storage::partitioner::PartitionManager;

    use std::sync::Arc;
    use std::time::Duration;

    async fn result_store() -> (Arc<ResultPublisher>, Arc<DistributedMap<ResultId, FunctorResult>>) {
        let membership = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();
        let partitioner = Arc::new(PartitionManager::new(membership.clone()));
        let results = Arc::new(DistributedMap::new(membership.clone(), partitioner));
        (ResultPublisher::new(membership, results.clone()), results)
    }

    fn value(v: i64) -> FunctorOutcome {
        FunctorOutcome::Value(Codec::Json.encode(&v).unwrap())
    }

    fn future_for(delivery: &ResultDelivery, result_id: &ResultId) -> FunctorFuture<i64> {
        let receiver = delivery.register(result_id.clone());
        FunctorFuture::new(SubmissionKey::new(ContextId::from("ctx"), 1), result_id.clone(), Codec::Json, receiver)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // ============================================================
    // RESULT STORE
    // ============================================================

    #[tokio::test]
    async fn test_store_keeps_first_completion() {
        let (publisher, results) = result_store().await;
        let result_id = ResultId::new();
        let submitter = SubmitterId::new();

        assert!(publisher.store(FunctorResult::pending(result_id.clone(), submitter.clone())));
        assert!(publisher.store(FunctorResult::completed(result_id.clone(), submitter.clone(), value(1))));
        assert!(!publisher.store(FunctorResult::completed(result_id.clone(), submitter.clone(), value(2))));

        let stored = results.get_local(&result_id).unwrap();
        assert!(stored.is_success());
        assert_eq!(stored.outcome, Some(value(1)));
    }

    // ============================================================
    // DELIVERY
    // ============================================================

    #[tokio::test]
    async fn test_delivery_resolves_once_and_removes_record() {
        // ARRANGE
        let (publisher, results) = result_store().await;
        let submitter = SubmitterId::new();
        let delivery = ResultDelivery::start(submitter.clone(), results.clone());
        let result_id = ResultId::new();
        let future = future_for(&delivery, &result_id);
        assert_eq!(delivery.outstanding(), 1);

        // ACT
        publisher
            .publish(&results.local_node_id(), FunctorResult::completed(result_id.clone(), submitter.clone(), value(42)))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(future.get_timeout(Duration::from_secs(2)).await.unwrap(), 42);
        settle().await;
        assert_eq!(delivery.outstanding(), 0);
        assert_eq!(delivery.delivered_count(), 1);
        assert!(!results.contains_local(&result_id), "consumed records are removed");

        // A late duplicate is swallowed without re-resolving anything.
        publisher.store(FunctorResult::completed(result_id.clone(), submitter, value(7)));
        settle().await;
        assert_eq!(delivery.delivered_count(), 1);
        assert!(!results.contains_local(&result_id));
        assert_eq!(future.get().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_delivery_ignores_incomplete_and_foreign_results() {
        let (publisher, results) = result_store().await;
        let mine = SubmitterId::new();
        let delivery = ResultDelivery::start(mine.clone(), results.clone());
        let result_id = ResultId::new();
        let future = future_for(&delivery, &result_id);

        publisher.store(FunctorResult::pending(result_id.clone(), mine.clone()));
        let foreign = ResultId::new();
        publisher.store(FunctorResult::completed(foreign.clone(), SubmitterId::new(), value(9)));
        settle().await;

        assert!(!future.is_done());
        assert!(results.contains_local(&foreign), "another submitter's record is left alone");
        assert_eq!(delivery.delivered_count(), 0);

        publisher.store(FunctorResult::completed(result_id.clone(), mine, value(3)));
        assert_eq!(future.get_timeout(Duration::from_secs(2)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_dropping_delivery_unsubscribes() {
        let (_publisher, results) = result_store().await;
        let delivery = ResultDelivery::start(SubmitterId::new(), results.clone());
        assert_eq!(results.listener_count(), 1);

        drop(delivery);
        assert_eq!(results.listener_count(), 0);
    }

    // ============================================================
    // FUTURES
    // ============================================================

    #[tokio::test]
    async fn test_future_times_out_then_resolves() {
        let (publisher, results) = result_store().await;
        let submitter = SubmitterId::new();
        let delivery = ResultDelivery::start(submitter.clone(), results.clone());
        let result_id = ResultId::new();
        let future = future_for(&delivery, &result_id);
        let copy = future.clone();

        match future.get_timeout(Duration::from_millis(20)).await {
            Err(EngineError::Timeout { waited_ms, .. }) => assert_eq!(waited_ms, 20),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(future.try_get().is_none());

        publisher.store(FunctorResult::completed(result_id, submitter, value(5)));
        assert_eq!(future.get().await.unwrap(), 5);
        assert_eq!(copy.try_get().unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_future_maps_failure_and_cancellation() {
        let (publisher, results) = result_store().await;
        let submitter = SubmitterId::new();
        let delivery = ResultDelivery::start(submitter.clone(), results.clone());

        let failed_id = ResultId::new();
        let failed = future_for(&delivery, &failed_id);
        let cancelled_id = ResultId::new();
        let cancelled = future_for(&delivery, &cancelled_id);

        publisher.store(FunctorResult::completed(
            failed_id,
            submitter.clone(),
            FunctorOutcome::Failure("boom".to_string()),
        ));
        publisher.store(FunctorResult::cancelled(cancelled_id, submitter));

        match failed.get_timeout(Duration::from_secs(2)).await {
            Err(EngineError::FunctorExecutionFailed { reason, .. }) => assert_eq!(reason, "boom"),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(
            cancelled.get_timeout(Duration::from_secs(2)).await,
            Err(EngineError::FunctorCancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_forgotten_future_reports_closed_channel() {
        let (_publisher, results) = result_store().await;
        let delivery = ResultDelivery::start(SubmitterId::new(), results);
        let result_id = ResultId::new();
        let future = future_for(&delivery, &result_id);

        delivery.forget(&result_id);

        assert!(matches!(
            future.get().await,
            Err(EngineError::ResultChannelClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_codec_error() {
        let (publisher, results) = result_store().await;
        let submitter = SubmitterId::new();
        let delivery = ResultDelivery::start(submitter.clone(), results.clone());
        let result_id = ResultId::new();
        let future = future_for(&delivery, &result_id);

        publisher.store(FunctorResult::completed(
            result_id,
            submitter,
            FunctorOutcome::Value(b"not json".to_vec()),
        ));

        assert!(matches!(
            future.get_timeout(Duration::from_secs(2)).await,
            Err(EngineError::Codec(_))
        ));
    }
}
