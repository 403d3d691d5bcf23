//! Integration tests for the order engine.
//!
//! These drive `OrderService` against the in-memory journal and check the
//! reconciliation rules end to end: totals, audit trail, disputes, returns,
//! refund-type switching and concurrent writers.

use std::sync::Arc;
use std::time::Duration;

use common::{AggregateId, UserId};
use domain::{
    Actor, Aggregate, CreateReturn, DomainError, EngineSettings, ErrorKind, InMemoryCatalog, IssueDetails,
    IssueStatus, IssueType, Money, NotificationTopic, Order, OrderError, OrderService,
    OrderStatus, PlaceOrder, Product, ProductId, RecordingDispatcher, RefundType, ReturnReason,
    ReturnStatus, SideEffect, SubstituteItem,
};
use domain::order::{BuyerResponse, ItemLifecycle};
use event_store::{EventStore, InMemoryEventStore};

struct World {
    service: OrderService<InMemoryEventStore>,
    store: InMemoryEventStore,
    catalog: InMemoryCatalog,
    dispatcher: Arc<RecordingDispatcher>,
    buyer: Actor,
    seller: Actor,
}

impl World {
    fn new() -> Self {
        Self::with_settings(InMemoryEventStore::new(), EngineSettings::default())
    }

    fn with_settings(store: InMemoryEventStore, settings: EngineSettings) -> Self {
        let catalog = InMemoryCatalog::with_products([
            Product::new("WINE", "House red", Money::from_dollars(50), 100, "case"),
            Product::new("BREAD", "Sourdough", Money::from_dollars(30), 100, "loaf"),
            Product::new("OIL", "Olive oil", Money::from_cents(1_100), 100, "bottle"),
            Product::new("FLOUR", "Rye flour", Money::from_cents(3_591), 100, "sack"),
            Product::new("TOM", "Tomatoes", Money::from_dollars(20), 100, "crate"),
            Product::new("PEP", "Peppers", Money::from_dollars(25), 100, "crate"),
        ]);
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let service = OrderService::with_settings(
            store.clone(),
            Arc::new(catalog.clone()),
            dispatcher.clone(),
            settings,
        );
        Self {
            service,
            store,
            catalog,
            dispatcher,
            buyer: Actor::buyer(UserId::new(), "Corner Bistro"),
            seller: Actor::seller(UserId::new(), "Green Farm"),
        }
    }

    async fn place(&self, lines: &[(&str, u32)]) -> Order {
        let cmd = lines
            .iter()
            .fold(PlaceOrder::new(self.buyer.id, self.seller.id), |cmd, (id, qty)| {
                cmd.line(*id, *qty)
            });
        self.service.place_order(cmd, &self.buyer).await.unwrap()
    }

    async fn move_to(&self, order_id: AggregateId, path: &[OrderStatus]) {
        for status in path {
            let outcome = self
                .service
                .transition_status(order_id, *status, &self.seller, None)
                .await
                .unwrap();
            assert!(outcome.updated, "{:?}", outcome.message);
        }
    }

    async fn delivered(&self, lines: &[(&str, u32)]) -> Order {
        let order = self.place(lines).await;
        let order_id = order.id().unwrap();
        self.move_to(
            order_id,
            &[
                OrderStatus::Confirmed,
                OrderStatus::Preparing,
                OrderStatus::InDelivery,
                OrderStatus::Delivered,
            ],
        )
        .await;
        self.service.get_order(order_id).await.unwrap().unwrap()
    }

    fn item_id(order: &Order, name: &str) -> domain::ItemId {
        order
            .active_items()
            .find(|item| item.product_name == name)
            .unwrap()
            .id
    }
}

mod totals {
    use super::*;

    #[tokio::test]
    async fn add_then_remove_recomputes_with_tax() {
        let world = World::new();
        let order = world.place(&[("WINE", 1), ("BREAD", 1)]).await;
        let order_id = order.id().unwrap();
        assert_eq!(order.total_amount(), Money::from_cents(8_800));
        assert_eq!(order.total_amount().to_string(), "$88.00");

        let bread = World::item_id(&order, "Sourdough");
        let removed = world
            .service
            .remove_item(order_id, bread, "sold out", &world.seller)
            .await
            .unwrap();

        assert_eq!(removed.new_total, Money::from_cents(5_500));
        assert_eq!(removed.remaining_item_count, 1);
        assert_eq!(removed.order.total_amount(), removed.order.recomputed_total());

        let stored = world.service.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(stored.total_amount(), Money::from_cents(5_500));
        assert!(matches!(
            stored.item(bread).unwrap().lifecycle,
            ItemLifecycle::Removed { .. }
        ));
    }

    #[tokio::test]
    async fn new_lines_use_the_current_catalog_price() {
        let world = World::new();
        let order = world.place(&[("WINE", 1)]).await;
        let order_id = order.id().unwrap();

        world
            .catalog
            .set_price(&ProductId::new("WINE"), Money::from_dollars(60));
        let added = world
            .service
            .add_item(order_id, ProductId::new("WINE"), 1, None, &world.buyer)
            .await
            .unwrap();

        assert_eq!(added.item.quantity, 2);
        assert_eq!(added.item.price_per_unit, Money::from_dollars(60));
        assert_eq!(added.new_total, Money::from_cents(13_200));
        assert_eq!(added.order.total_amount(), added.order.recomputed_total());
    }

    #[tokio::test]
    async fn removing_every_item_cancels_the_order() {
        let world = World::new();
        let order = world.place(&[("WINE", 1)]).await;
        let order_id = order.id().unwrap();

        let removed = world
            .service
            .remove_item(order_id, order.items()[0].id, "vintage unavailable", &world.seller)
            .await
            .unwrap();

        assert_eq!(removed.remaining_item_count, 0);
        assert_eq!(removed.order.status(), OrderStatus::Canceled);
        let history = world.service.status_history(order_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history[0].note.as_deref(),
            Some("All items removed: vintage unavailable")
        );
    }

    #[tokio::test]
    async fn items_are_frozen_once_preparing() {
        let world = World::new();
        let order = world.place(&[("WINE", 1)]).await;
        let order_id = order.id().unwrap();
        world
            .move_to(order_id, &[OrderStatus::Confirmed, OrderStatus::Preparing])
            .await;

        let err = world
            .service
            .add_item(order_id, ProductId::new("BREAD"), 1, None, &world.buyer)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert!(matches!(
            err.as_order_error(),
            Some(OrderError::ItemsFrozen { status: OrderStatus::Preparing, .. })
        ));
    }
}

mod audit {
    use super::*;

    #[tokio::test]
    async fn one_entry_per_committed_change_and_none_for_rejections() {
        let world = World::new();
        let order_id = world.place(&[("WINE", 1)]).await.id().unwrap();

        world.move_to(order_id, &[OrderStatus::Confirmed]).await;
        let denied = world
            .service
            .transition_status(order_id, OrderStatus::Completed, &world.seller, None)
            .await
            .unwrap();
        assert!(!denied.updated);
        world
            .service
            .transition_status(order_id, OrderStatus::Canceled, &world.buyer, Some("changed plans".into()))
            .await
            .unwrap();
        let after_final = world
            .service
            .transition_status(order_id, OrderStatus::Confirmed, &world.seller, None)
            .await
            .unwrap();
        assert!(!after_final.updated);
        assert!(after_final.message.unwrap().contains("final"));

        let history = world.service.status_history(order_id).await.unwrap();
        let path: Vec<_> = history
            .iter()
            .map(|e| (e.previous_status, e.new_status))
            .collect();
        assert_eq!(
            path,
            vec![
                (OrderStatus::Pending, OrderStatus::Confirmed),
                (OrderStatus::Confirmed, OrderStatus::Canceled),
            ]
        );
        assert_eq!(history[1].actor_id, world.buyer.id);
        assert_eq!(history[1].actor_name, "Corner Bistro");
        assert_eq!(history[1].note.as_deref(), Some("changed plans"));
    }

    #[tokio::test]
    async fn admin_may_take_seller_edges() {
        let world = World::new();
        let order_id = world.place(&[("WINE", 1)]).await.id().unwrap();
        let admin = Actor::admin(UserId::new(), "Ops");

        let outcome = world
            .service
            .transition_status(order_id, OrderStatus::Confirmed, &admin, None)
            .await
            .unwrap();

        assert!(outcome.updated);
        assert_eq!(outcome.audit_entry.unwrap().actor_role, domain::Role::Admin);
    }

    #[tokio::test]
    async fn system_completes_delivered_orders() {
        let world = World::new();
        let order_id = world.delivered(&[("WINE", 1)]).await.id().unwrap();
        world.dispatcher.clear();

        let outcome = world
            .service
            .transition_status(order_id, OrderStatus::Completed, &Actor::system("auto-complete"), None)
            .await
            .unwrap();

        assert!(outcome.updated);
        let recipients: Vec<_> = world
            .dispatcher
            .notifications()
            .into_iter()
            .filter(|n| n.topic == NotificationTopic::OrderCompleted)
            .map(|n| n.recipient)
            .collect();
        assert_eq!(recipients, vec![world.buyer.id, world.seller.id]);
    }
}

mod disputes {
    use super::*;

    #[tokio::test]
    async fn substitution_resolves_reported_issue() {
        let world = World::new();
        let order = world.place(&[("TOM", 2), ("BREAD", 1)]).await;
        let order_id = order.id().unwrap();
        let tomatoes = World::item_id(&order, "Tomatoes");

        let report = world
            .service
            .report_issue(
                order_id,
                IssueDetails::for_item(tomatoes, IssueType::OutOfStock, "Tomatoes are out")
                    .proposal("Peppers instead")
                    .substitute("PEP"),
                &world.seller,
            )
            .await
            .unwrap();
        assert_eq!(report.order.status(), OrderStatus::IssueReported);
        assert_eq!(report.issue.status, IssueStatus::BuyerNotified);
        assert_eq!(report.issue.product_name.as_deref(), Some("Tomatoes"));
        assert_eq!(report.order.issues().len(), 1);

        let substituted = world
            .service
            .substitute_item(
                SubstituteItem::new(order_id, tomatoes, "PEP", "Peppers", "Accepting proposal"),
                &world.buyer,
            )
            .await
            .unwrap();

        let issue = substituted.order.issue(report.issue.id).unwrap();
        assert_eq!(issue.status, IssueStatus::Resolved);
        assert_eq!(issue.buyer_response, Some(BuyerResponse::SubstitutedByBuyer));
        assert!(!substituted.order.has_issues());
        assert_eq!(substituted.new_item.product_name, "Peppers");
        assert_eq!(substituted.new_item.quantity, 2);
        assert!(matches!(
            substituted.substituted_item.lifecycle,
            ItemLifecycle::Substituted { .. }
        ));
        // 2 x $25 + $30 with tax.
        assert_eq!(substituted.new_total, Money::from_cents(8_800));
        assert_eq!(substituted.order.total_amount(), substituted.order.recomputed_total());
    }

    #[tokio::test]
    async fn pending_issues_hold_the_order_until_answered() {
        let world = World::new();
        let order = world.place(&[("TOM", 5)]).await;
        let order_id = order.id().unwrap();
        let tomatoes = order.items()[0].id;

        let report = world
            .service
            .report_issue(
                order_id,
                IssueDetails::for_item(tomatoes, IssueType::InsufficientQuantity, "only 3 crates")
                    .quantities(5, 3),
                &world.seller,
            )
            .await
            .unwrap();

        let held = world
            .service
            .transition_status(order_id, OrderStatus::Locked, &world.seller, None)
            .await
            .unwrap();
        assert!(!held.updated);

        let answer = world
            .service
            .respond_to_issue(order_id, report.issue.id, false, "need all five", &world.buyer)
            .await
            .unwrap();
        assert_eq!(answer.issue.status, IssueStatus::Rejected);
        assert_eq!(answer.pending_issues, 1);
        assert!(!answer.can_lock);

        let seller_notes: Vec<_> = world
            .dispatcher
            .notifications()
            .into_iter()
            .filter(|n| n.topic == NotificationTopic::IssueAnswered)
            .collect();
        assert_eq!(seller_notes.len(), 1);
        assert_eq!(seller_notes[0].recipient, world.seller.id);
    }

    #[tokio::test]
    async fn only_the_buyer_answers() {
        let world = World::new();
        let order = world.place(&[("TOM", 1)]).await;
        let order_id = order.id().unwrap();
        let report = world
            .service
            .report_issue(
                order_id,
                IssueDetails::for_item(order.items()[0].id, IssueType::QualityProblem, "bruised"),
                &world.seller,
            )
            .await
            .unwrap();

        let err = world
            .service
            .respond_to_issue(order_id, report.issue.id, true, "fine", &world.seller)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
}

mod returns {
    use super::*;

    async fn hundred_dollar_order(world: &World) -> Order {
        // 5 x $11.00 + $35.91 = $90.91, $100.00 with tax.
        let order = world.delivered(&[("OIL", 5), ("FLOUR", 1)]).await;
        assert_eq!(order.total_amount(), Money::from_cents(10_000));
        order
    }

    #[tokio::test]
    async fn second_return_is_bounded_by_what_is_left() {
        let world = World::new();
        let order = hundred_dollar_order(&world).await;
        let order_id = order.id().unwrap();
        let oil = World::item_id(&order, "Olive oil");

        let first = world
            .service
            .create_return(
                CreateReturn::new(order_id, ReturnReason::Damaged, RefundType::Refund).line(oil, 5),
                &world.buyer,
            )
            .await
            .unwrap();
        assert_eq!(first.total_return_amount, Money::from_cents(5_500));
        assert_eq!(first.restock_fee, Money::from_cents(275));
        assert_eq!(first.final_refund_amount, Money::from_cents(5_225));
        assert!(first.return_number.starts_with("RET-"));

        let err = world
            .service
            .create_return(
                CreateReturn::new(order_id, ReturnReason::Damaged, RefundType::Refund).line(oil, 5),
                &world.buyer,
            )
            .await
            .unwrap_err();

        match err.as_order_error() {
            Some(OrderError::RefundExceedsAvailable(shortfall)) => {
                assert_eq!(shortfall.available, Money::from_cents(4_775));
                assert_eq!(shortfall.already_returned, Money::from_cents(5_225));
                assert_eq!(shortfall.requested, Money::from_cents(5_225));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("$47.75"));

        let found = world.service.find_return(first.id).await.unwrap().unwrap();
        assert_eq!(found.status, ReturnStatus::Pending);
    }

    #[tokio::test]
    async fn concurrent_returns_never_exceed_the_total() {
        let world = World::new();
        let order = hundred_dollar_order(&world).await;
        let order_id = order.id().unwrap();
        let oil = World::item_id(&order, "Olive oil");

        let attempts = (0..4).map(|_| {
            world.service.create_return(
                CreateReturn::new(order_id, ReturnReason::Damaged, RefundType::Refund).line(oil, 5),
                &world.buyer,
            )
        });
        let results = futures_util::future::join_all(attempts).await;

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1);
        for rejected in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(
                rejected.kind(),
                ErrorKind::StateConflict | ErrorKind::Transient
            ));
        }

        let stored = world.service.get_order(order_id).await.unwrap().unwrap();
        assert!(stored.already_returned() <= stored.total_amount());
        assert_eq!(stored.returns().len(), 1);
    }

    #[tokio::test]
    async fn returns_need_a_delivered_order() {
        let world = World::new();
        let order = world.place(&[("OIL", 2)]).await;

        let err = world
            .service
            .create_return(
                CreateReturn::new(order.id().unwrap(), ReturnReason::Damaged, RefundType::Refund)
                    .line(order.items()[0].id, 1),
                &world.buyer,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_order_error(),
            Some(OrderError::ReturnsNotAccepted { status: OrderStatus::Pending })
        ));
    }

    #[tokio::test]
    async fn switching_to_credit_twice_issues_one_note() {
        let world = World::new();
        let order = hundred_dollar_order(&world).await;
        let oil = World::item_id(&order, "Olive oil");
        let ret = world
            .service
            .create_return(
                CreateReturn::new(order.id().unwrap(), ReturnReason::WrongItem, RefundType::Refund)
                    .line(oil, 2),
                &world.buyer,
            )
            .await
            .unwrap();
        world
            .service
            .approve_return(ret.id, None, &world.seller)
            .await
            .unwrap();

        let first = world
            .service
            .change_refund_type(ret.id, RefundType::Credit, &world.buyer)
            .await
            .unwrap();
        let second = world
            .service
            .change_refund_type(ret.id, RefundType::Credit, &world.buyer)
            .await
            .unwrap();

        let note = first.credit_note.clone().unwrap();
        assert_eq!(second.credit_note, Some(note.clone()));
        assert_eq!(note.amount, ret.final_refund_amount);
        assert!(note.credit_number.starts_with("CN-"));

        let credit_notices = world
            .dispatcher
            .notifications()
            .into_iter()
            .filter(|n| n.topic == NotificationTopic::CreditIssued)
            .count();
        assert_eq!(credit_notices, 1);
    }

    #[tokio::test]
    async fn spent_credit_cannot_be_switched_away() {
        let world = World::new();
        let order = hundred_dollar_order(&world).await;
        let oil = World::item_id(&order, "Olive oil");
        let ret = world
            .service
            .create_return(
                CreateReturn::new(order.id().unwrap(), ReturnReason::Damaged, RefundType::Credit)
                    .line(oil, 3),
                &world.buyer,
            )
            .await
            .unwrap();
        world
            .service
            .approve_return(ret.id, Some("photos confirm damage".into()), &world.seller)
            .await
            .unwrap();

        let note = world
            .service
            .redeem_credit(ret.id, Money::from_cents(1_000), &world.buyer)
            .await
            .unwrap();
        assert_eq!(note.used_amount, Money::from_cents(1_000));
        assert_eq!(note.balance + note.used_amount, note.amount);

        let err = world
            .service
            .change_refund_type(ret.id, RefundType::Refund, &world.buyer)
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_order_error(),
            Some(OrderError::CreditPartiallyUsed { .. })
        ));

        let stored = world.service.find_return(ret.id).await.unwrap().unwrap();
        assert_eq!(stored.refund_type, RefundType::Credit);
        assert_eq!(stored.credit_note.unwrap().used_amount, Money::from_cents(1_000));
    }

    #[tokio::test]
    async fn full_return_lifecycle() {
        let world = World::new();
        let order = hundred_dollar_order(&world).await;
        let flour = World::item_id(&order, "Rye flour");
        let ret = world
            .service
            .create_return(
                CreateReturn::new(order.id().unwrap(), ReturnReason::QualityIssue, RefundType::Replacement)
                    .line(flour, 1)
                    .details("weevils"),
                &world.buyer,
            )
            .await
            .unwrap();

        let approved = world
            .service
            .approve_return(ret.id, None, &world.seller)
            .await
            .unwrap();
        assert_eq!(approved.status, ReturnStatus::Approved);

        let completed = world
            .service
            .complete_return(ret.id, &world.seller)
            .await
            .unwrap();
        assert_eq!(completed.status, ReturnStatus::Completed);
        assert!(completed.completed_at.is_some());

        let reviewed = world
            .dispatcher
            .notifications()
            .into_iter()
            .filter(|n| n.topic == NotificationTopic::ReturnReviewed)
            .count();
        assert_eq!(reviewed, 2);
    }

    #[tokio::test]
    async fn rejected_return_frees_the_refund_capacity() {
        let world = World::new();
        let order = hundred_dollar_order(&world).await;
        let order_id = order.id().unwrap();
        let oil = World::item_id(&order, "Olive oil");
        let cmd = CreateReturn::new(order_id, ReturnReason::Other, RefundType::Refund).line(oil, 5);

        let ret = world.service.create_return(cmd.clone(), &world.buyer).await.unwrap();
        let rejected = world
            .service
            .reject_return(ret.id, "outside return window", &world.seller)
            .await
            .unwrap();
        assert_eq!(rejected.status, ReturnStatus::Rejected);

        assert!(world.service.create_return(cmd, &world.buyer).await.is_ok());
    }
}

mod infrastructure {
    use super::*;

    #[tokio::test]
    async fn commit_timeout_leaves_no_trace() {
        let store = InMemoryEventStore::new();
        let world = World::new();
        let order = {
            let placing = World::with_settings(store.clone(), EngineSettings::default());
            let cmd = PlaceOrder::new(world.buyer.id, world.seller.id).line("WINE", 1);
            placing.service.place_order(cmd, &world.buyer).await.unwrap()
        };
        let order_id = order.id().unwrap();

        let slow = World::with_settings(
            store.clone().with_append_delay(Duration::from_millis(200)),
            EngineSettings {
                commit_timeout: Duration::from_millis(20),
                ..EngineSettings::default()
            },
        );
        let err = slow
            .service
            .transition_status(order_id, OrderStatus::Confirmed, &world.seller, None)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(matches!(err, DomainError::EventStore(_)));
        assert_eq!(store.get_events_for_aggregate(order_id).await.unwrap().len(), 1);
        assert!(slow.dispatcher.effects().is_empty());
    }

    #[tokio::test]
    async fn effects_follow_the_commit() {
        let world = World::new();
        let order_id = world.place(&[("WINE", 1)]).await.id().unwrap();
        world.dispatcher.clear();

        world.move_to(order_id, &[OrderStatus::Confirmed]).await;

        let effects = world.dispatcher.effects();
        assert!(matches!(&effects[0], SideEffect::Publish(update) if update.status == OrderStatus::Confirmed));
        assert!(matches!(&effects[1], SideEffect::Notify(n) if n.recipient == world.buyer.id));
        assert_eq!(effects.len(), 2);

        assert_eq!(world.store.event_count().await, 2);
    }

    #[tokio::test]
    async fn orders_are_found_by_number() {
        let world = World::new();
        let order = world.place(&[("WINE", 1)]).await;

        let found = world
            .service
            .find_order_by_number(order.order_number())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), order.id());
        assert!(
            world
                .service
                .find_order_by_number("ORD-19700101-00000000")
                .await
                .unwrap()
                .is_none()
        );
    }
}
