//! End-to-end tests against the public `Ledger` API

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tab_ledger::{
    config::StorageBackend, ActivityDraft, Config, Error, EventDraft, EventId, FriendRequestOutcome,
    Gratuity, Ledger, MemoryGateway, PersistenceGateway, ProposedItem, SettlementCheck,
    SettlementFlag, UserId, UserProfile,
};

struct Fixture {
    ledger: Ledger,
    gateway: Arc<MemoryGateway>,
    alice: UserId,
    bob: UserId,
    carol: UserId,
    event_id: EventId,
}

async fn fixture_with(config: Config, gateway: MemoryGateway) -> Fixture {
    let gateway = Arc::new(gateway);
    let ledger = Ledger::with_gateway(config, gateway.clone()).await.unwrap();
    let alice = ledger.register_user("Alice", "alice@example.com").await.unwrap();
    let bob = ledger.register_user("Bob", "bob@example.com").await.unwrap();
    let carol = ledger.register_user("Carol", "carol@example.com").await.unwrap();
    let event_id = ledger
        .create_event(alice, EventDraft::new("Lisbon", Utc::now(), vec![bob, carol]))
        .await
        .unwrap();

    Fixture {
        ledger,
        gateway,
        alice,
        bob,
        carol,
        event_id,
    }
}

async fn fixture() -> Fixture {
    fixture_with(Config::in_memory(), MemoryGateway::new()).await
}

fn item(name: &str, cost: i64, payers: &[(UserId, i64)]) -> ProposedItem {
    payers.iter().fold(
        ProposedItem::new(name, Decimal::from(cost), false),
        |item, (payer, amount)| item.with_payer(*payer, Decimal::from(*amount)),
    )
}

#[tokio::test]
async fn test_dinner_scenario_end_to_end() {
    let f = fixture().await;
    let draft = ActivityDraft::new("Dinner")
        .with_gratuity(Gratuity::Percent(Decimal::from(10)))
        .with_item(item("Steak", 60, &[(f.bob, 60)]));
    let activity_id = f.ledger.create_activity(f.event_id, f.alice, draft).await.unwrap();

    assert_eq!(f.ledger.net_amount_between(f.event_id, f.alice, f.bob).await.unwrap(), Decimal::from(66));
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.bob, f.alice).await.unwrap(), Decimal::from(-66));
    assert_eq!(f.ledger.user_total_owing(f.event_id, f.bob).await.unwrap(), Decimal::from(66));

    // Claiming payment alone keeps the debt on the books
    f.ledger.set_has_paid(f.event_id, activity_id, f.bob, true).await.unwrap();
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.alice, f.bob).await.unwrap(), Decimal::from(66));
    assert!(f.ledger.has_payer_settled_debt(f.event_id, f.alice, f.bob).await.unwrap());

    f.ledger
        .set_payment_confirmed(f.event_id, activity_id, f.bob, true)
        .await
        .unwrap();
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.alice, f.bob).await.unwrap(), Decimal::ZERO);
    assert_eq!(f.ledger.user_total_owed(f.event_id, f.alice).await.unwrap(), Decimal::ZERO);

    let summary = f.ledger.event_summary(f.event_id, f.alice).await.unwrap();
    assert_eq!(summary.total_owed, Decimal::ZERO);
    let bob_row = summary
        .participants
        .iter()
        .find(|p| p.contact.user_id == f.bob)
        .unwrap();
    assert!(bob_row.payment_confirmed);
}

#[tokio::test]
async fn test_persistence_failure_rolls_back_every_mutation_kind() {
    let f = fixture().await;
    let activity_id = f
        .ledger
        .create_activity(
            f.event_id,
            f.alice,
            ActivityDraft::new("Taxi").with_item(item("Ride", 30, &[(f.bob, 15), (f.carol, 15)])),
        )
        .await
        .unwrap();
    let before = f.ledger.snapshot().await.unwrap();

    f.gateway.set_failing(true);
    let results = vec![
        f.ledger.register_user("Dave", "dave@example.com").await.map(|_| ()),
        f.ledger.send_friend_request(f.alice, f.bob).await.map(|_| ()),
        f.ledger
            .update_event(f.alice, f.event_id, EventDraft::new("Porto", Utc::now(), vec![f.bob, f.carol]))
            .await,
        f.ledger
            .update_activity(
                f.alice,
                f.event_id,
                activity_id,
                ActivityDraft::new("Taxi").with_item(item("Ride", 40, &[(f.bob, 20), (f.carol, 20)])),
            )
            .await
            .map(|_| ()),
        f.ledger.set_has_paid(f.event_id, activity_id, f.bob, true).await.map(|_| ()),
        f.ledger.delete_activity(f.bob, f.event_id, activity_id).await,
        f.ledger.delete_event(f.alice, f.event_id).await,
    ];
    f.gateway.set_failing(false);

    for result in results {
        assert!(matches!(result, Err(Error::Persistence(_))), "{:?}", result);
    }
    assert_eq!(f.ledger.snapshot().await.unwrap(), before);
    assert_eq!(f.ledger.metrics().failures("delete_event", "persistence"), 1);
}

#[tokio::test]
async fn test_concurrent_writers_lose_no_updates() {
    let gateway = MemoryGateway::new().with_write_delay(Duration::from_millis(2));
    let f = fixture_with(Config::in_memory(), gateway).await;

    let mut tasks = Vec::new();
    for n in 0..16 {
        let ledger = f.ledger.clone();
        let (event_id, payee, payer) = if n % 2 == 0 {
            (f.event_id, f.alice, f.bob)
        } else {
            (f.event_id, f.bob, f.carol)
        };
        tasks.push(tokio::spawn(async move {
            let draft = ActivityDraft::new(format!("Round {}", n))
                .with_item(item("Drinks", 10, &[(payer, 10)]));
            ledger.create_activity(event_id, payee, draft).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let event = f.ledger.event(f.event_id).await.unwrap();
    assert_eq!(event.activities.len(), 16);
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.alice, f.bob).await.unwrap(), Decimal::from(80));
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.bob, f.carol).await.unwrap(), Decimal::from(80));

    // Every write went to the gateway and the gateway agrees with memory
    let persisted = f.gateway.load_all().await.unwrap();
    assert_eq!(persisted.events, f.ledger.snapshot().await.unwrap().events);
}

#[tokio::test]
async fn test_concurrent_friend_requests_to_one_user() {
    let f = fixture_with(
        Config::in_memory(),
        MemoryGateway::new().with_write_delay(Duration::from_millis(1)),
    )
    .await;

    let mut senders = Vec::new();
    for n in 0..8 {
        senders.push(
            f.ledger
                .register_user(format!("Fan {}", n), format!("fan{}@example.com", n))
                .await
                .unwrap(),
        );
    }

    let tasks: Vec<_> = senders
        .iter()
        .map(|from| {
            let ledger = f.ledger.clone();
            let (from, to) = (*from, f.alice);
            tokio::spawn(async move { ledger.send_friend_request(from, to).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), FriendRequestOutcome::Sent);
    }

    let alice = f.ledger.user(f.alice).await.unwrap();
    assert_eq!(alice.incoming_friend_requests.len(), senders.len());
}

#[tokio::test]
async fn test_unknown_user_is_invalid_reference() {
    let f = fixture().await;
    let ghost = UserId(404);

    let draft = ActivityDraft::new("Dinner").with_item(item("Pasta", 20, &[(ghost, 20)]));
    let result = f.ledger.create_activity(f.event_id, f.alice, draft).await;
    assert!(matches!(result, Err(Error::InvalidReference(id)) if id == ghost));

    let result = f
        .ledger
        .create_event(f.alice, EventDraft::new("Party", Utc::now(), vec![f.bob, ghost]))
        .await;
    assert!(matches!(result, Err(Error::InvalidReference(id)) if id == ghost));

    assert!(matches!(
        f.ledger.send_friend_request(ghost, f.alice).await,
        Err(Error::InvalidReference(_))
    ));
    assert_eq!(f.ledger.metrics().failures("create_activity", "rejected"), 1);
}

#[tokio::test]
async fn test_malformed_allocations_are_rejected() {
    let f = fixture().await;

    // Shares exceed the item cost
    let over = ActivityDraft::new("Dinner").with_item(item("Pasta", 20, &[(f.bob, 15), (f.carol, 15)]));
    assert!(matches!(
        f.ledger.create_activity(f.event_id, f.alice, over).await,
        Err(Error::InvalidInput(_))
    ));

    // Only the payee pays
    let own = ActivityDraft::new("Dinner").with_item(item("Pasta", 20, &[(f.alice, 20)]));
    assert!(matches!(
        f.ledger.create_activity(f.event_id, f.alice, own).await,
        Err(Error::InvalidInput(_))
    ));

    // No items at all
    assert!(matches!(
        f.ledger.create_activity(f.event_id, f.alice, ActivityDraft::new("Nothing")).await,
        Err(Error::InvalidInput(_))
    ));

    assert!(f.ledger.event(f.event_id).await.unwrap().activities.is_empty());
}

#[tokio::test]
async fn test_permissions() {
    let f = fixture().await;
    let outsider = f.ledger.register_user("Mallory", "mallory@example.com").await.unwrap();
    let activity_id = f
        .ledger
        .create_activity(
            f.event_id,
            f.alice,
            ActivityDraft::new("Museum").with_item(item("Tickets", 40, &[(f.bob, 20), (f.carol, 20)])),
        )
        .await
        .unwrap();

    let edit = ActivityDraft::new("Museum").with_item(item("Tickets", 20, &[(f.bob, 20)]));
    assert!(matches!(
        f.ledger.update_activity(f.bob, f.event_id, activity_id, edit).await,
        Err(Error::NotPermitted(_))
    ));
    assert!(matches!(
        f.ledger
            .update_event(f.bob, f.event_id, EventDraft::new("Mine now", Utc::now(), vec![]))
            .await,
        Err(Error::NotPermitted(_))
    ));
    assert!(matches!(
        f.ledger.delete_event(f.bob, f.event_id).await,
        Err(Error::NotPermitted(_))
    ));
    assert!(matches!(
        f.ledger.delete_activity(outsider, f.event_id, activity_id).await,
        Err(Error::NotPermitted(_))
    ));

    // Payers outside the event cannot be charged
    let stray = ActivityDraft::new("Lunch").with_item(item("Soup", 10, &[(outsider, 10)]));
    assert!(matches!(
        f.ledger.create_activity(f.event_id, f.alice, stray).await,
        Err(Error::InvalidInput(_))
    ));

    // Any member may delete an activity
    f.ledger.delete_activity(f.carol, f.event_id, activity_id).await.unwrap();
    assert!(matches!(
        f.ledger.activity(f.event_id, activity_id).await,
        Err(Error::ActivityNotFound(_))
    ));
}

#[tokio::test]
async fn test_update_activity_keeps_unchanged_items_and_their_flags() {
    let f = fixture().await;
    let draft = ActivityDraft::new("Market")
        .with_item(item("Bread", 10, &[(f.bob, 10)]))
        .with_item(item("Cheese", 30, &[(f.bob, 15), (f.carol, 15)]));
    let activity_id = f
        .ledger
        .create_activity(f.event_id, f.alice, draft.clone())
        .await
        .unwrap();
    f.ledger.set_has_paid(f.event_id, activity_id, f.carol, true).await.unwrap();
    let cheese_id = f.ledger.activity(f.event_id, activity_id).await.unwrap().items[1].id;

    // Same list in another order is a no-op
    let mut reordered = draft.clone();
    reordered.items.reverse();
    let diff = f
        .ledger
        .update_activity(f.alice, f.event_id, activity_id, reordered)
        .await
        .unwrap();
    assert!(diff.is_empty());

    // Swap the bread for wine; cheese stays with Carol's flag intact
    let edited = ActivityDraft::new("Market")
        .with_gratuity(Gratuity::Flat(Decimal::from(4)))
        .with_item(item("Cheese", 30, &[(f.bob, 15), (f.carol, 15)]))
        .with_item(item("Wine", 20, &[(f.bob, 20)]));
    let diff = f
        .ledger
        .update_activity(f.alice, f.event_id, activity_id, edited)
        .await
        .unwrap();
    assert_eq!(diff.to_add.len(), 1);
    assert_eq!(diff.to_remove.len(), 1);
    assert_eq!(diff.unchanged, vec![cheese_id]);

    let activity = f.ledger.activity(f.event_id, activity_id).await.unwrap();
    assert_eq!(activity.items.len(), 2);
    let cheese = activity.items.iter().find(|i| i.id == cheese_id).unwrap();
    assert!(cheese.payers.iter().any(|p| p.payer == f.carol && p.has_paid));
    assert_eq!(activity.gratuity, Gratuity::Flat(Decimal::from(4)));

    // Bob: 15 + 20 + half of the flat 4
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.alice, f.bob).await.unwrap(), Decimal::from(37));
}

#[tokio::test]
async fn test_settle_with_creditor_spans_activities() {
    let f = fixture().await;
    for name in ["Breakfast", "Lunch"] {
        f.ledger
            .create_activity(
                f.event_id,
                f.alice,
                ActivityDraft::new(name).with_item(item("Food", 20, &[(f.bob, 10), (f.carol, 10)])),
            )
            .await
            .unwrap();
    }
    f.ledger
        .create_activity(
            f.event_id,
            f.carol,
            ActivityDraft::new("Dinner").with_item(item("Food", 12, &[(f.bob, 12)])),
        )
        .await
        .unwrap();

    let touched = f
        .ledger
        .settle_with_creditor(f.event_id, f.alice, f.bob, SettlementFlag::PaymentConfirmed, true)
        .await
        .unwrap();
    assert_eq!(touched, 2);
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.alice, f.bob).await.unwrap(), Decimal::ZERO);
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.carol, f.bob).await.unwrap(), Decimal::from(12));
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.alice, f.carol).await.unwrap(), Decimal::from(20));

    // Bob paid for nothing, so Alice has no shares owed to him
    assert!(matches!(
        f.ledger
            .settle_with_creditor(f.event_id, f.bob, f.alice, SettlementFlag::HasPaid, true)
            .await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_literal_settlement_check_is_configurable() {
    let mut config = Config::in_memory();
    config.settlement.check = SettlementCheck::LiteralAllEntries;
    let f = fixture_with(config, MemoryGateway::new()).await;

    let activity_id = f
        .ledger
        .create_activity(
            f.event_id,
            f.alice,
            ActivityDraft::new("Boat").with_item(item("Tour", 40, &[(f.bob, 20), (f.carol, 20)])),
        )
        .await
        .unwrap();
    f.ledger.set_has_paid(f.event_id, activity_id, f.bob, true).await.unwrap();
    f.ledger.set_has_paid(f.event_id, activity_id, f.carol, true).await.unwrap();

    // A shared activity never counts as repaid under the literal check
    assert!(!f.ledger.has_payer_settled_debt(f.event_id, f.alice, f.bob).await.unwrap());
}

#[tokio::test]
async fn test_update_event_guards_participants_with_debts() {
    let f = fixture().await;
    f.ledger
        .create_activity(
            f.event_id,
            f.alice,
            ActivityDraft::new("Taxi").with_item(item("Ride", 10, &[(f.bob, 10)])),
        )
        .await
        .unwrap();

    let without_bob = EventDraft::new("Lisbon", Utc::now(), vec![f.carol]);
    assert!(matches!(
        f.ledger.update_event(f.alice, f.event_id, without_bob).await,
        Err(Error::InvalidInput(_))
    ));

    let without_carol = EventDraft::new("Lisbon & Sintra", Utc::now(), vec![f.bob]);
    f.ledger.update_event(f.alice, f.event_id, without_carol).await.unwrap();
    let event = f.ledger.event(f.event_id).await.unwrap();
    assert_eq!(event.name, "Lisbon & Sintra");
    assert_eq!(event.participants, vec![f.bob]);
    assert!(f.ledger.user_events(f.carol).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_friend_lifecycle_and_profiles() {
    let f = fixture().await;

    assert_eq!(
        f.ledger.send_friend_request(f.alice, f.bob).await.unwrap(),
        FriendRequestOutcome::Sent
    );
    // Bob asking back accepts Alice's pending request
    assert_eq!(
        f.ledger.send_friend_request(f.bob, f.alice).await.unwrap(),
        FriendRequestOutcome::Accepted
    );
    assert!(f.ledger.user(f.alice).await.unwrap().is_friend(f.bob));

    f.ledger.send_friend_request(f.carol, f.alice).await.unwrap();
    f.ledger.respond_to_friend_request(f.alice, f.carol, false).await.unwrap();
    let alice = f.ledger.user(f.alice).await.unwrap();
    assert!(!alice.is_friend(f.carol));
    assert!(alice.incoming_friend_requests.is_empty());

    f.ledger.remove_friend(f.bob, f.alice).await.unwrap();
    assert!(f.ledger.user(f.alice).await.unwrap().friends.is_empty());

    assert!(matches!(
        f.ledger.register_user("Other Bob", " BOB@example.com ").await,
        Err(Error::InvalidInput(_))
    ));
    f.ledger
        .update_profile(
            f.bob,
            UserProfile::new("Robert", "robert@example.com").with_phone_number("555-0199"),
        )
        .await
        .unwrap();
    let bob = f.ledger.user(f.bob).await.unwrap();
    assert_eq!(bob.display_name, "Robert");
    assert_eq!(bob.phone_number.as_deref(), Some("555-0199"));
}

#[tokio::test]
async fn test_rocksdb_ledger_survives_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Rocksdb;
    config.storage.data_dir = temp_dir.path().to_path_buf();

    let (alice, bob, event_id, activity_id) = {
        let ledger = Ledger::open(config.clone()).await.unwrap();
        let alice = ledger.register_user("Alice", "alice@example.com").await.unwrap();
        let bob = ledger.register_user("Bob", "bob@example.com").await.unwrap();
        let event_id = ledger
            .create_event(alice, EventDraft::new("Trip", Utc::now(), vec![bob]))
            .await
            .unwrap();
        let activity_id = ledger
            .create_activity(
                event_id,
                alice,
                ActivityDraft::new("Dinner")
                    .with_gratuity(Gratuity::Percent(Decimal::from(10)))
                    .with_item(item("Steak", 60, &[(bob, 60)])),
            )
            .await
            .unwrap();
        ledger.set_has_paid(event_id, activity_id, bob, true).await.unwrap();
        ledger.shutdown().await.unwrap();
        (alice, bob, event_id, activity_id)
    };

    let ledger = Ledger::open(config).await.unwrap();
    assert_eq!(ledger.net_amount_between(event_id, alice, bob).await.unwrap(), Decimal::from(66));
    assert!(ledger.has_payer_settled_debt(event_id, alice, bob).await.unwrap());

    // Ids keep counting after a restart
    let carol = ledger.register_user("Carol", "carol@example.com").await.unwrap();
    assert!(carol > bob);

    let summary = ledger.activity_summary(event_id, activity_id, bob).await.unwrap();
    assert_eq!(summary.amount, Decimal::from(66));
    assert_eq!(summary.payee.display_name, "Alice");
    ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_oversized_draft_rejected_and_ledger_keeps_answering() {
    let f = fixture().await;
    let writes = f.gateway.committed_writes();
    let huge_percent = ActivityDraft::new("Dinner")
        .with_gratuity(Gratuity::Percent(Decimal::MAX))
        .with_item(item("Steak", 1000, &[(f.bob, 1000)]));
    let result = f.ledger.create_activity(f.event_id, f.alice, huge_percent).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    let huge_shares = ActivityDraft::new("Dinner").with_item(
        ProposedItem::new("Steak", Decimal::MAX, false)
            .with_payer(f.bob, Decimal::MAX)
            .with_payer(f.carol, Decimal::MAX),
    );
    let result = f.ledger.create_activity(f.event_id, f.alice, huge_shares).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert_eq!(f.gateway.committed_writes(), writes);

    let dave = f.ledger.register_user("Dave", "dave@example.com").await.unwrap();
    assert_eq!(f.ledger.user(dave).await.unwrap().display_name, "Dave");
    let draft = ActivityDraft::new("Taxi").with_item(item("Ride", 30, &[(f.bob, 30)]));
    f.ledger.create_activity(f.event_id, f.alice, draft).await.unwrap();
    assert_eq!(f.ledger.net_amount_between(f.event_id, f.alice, f.bob).await.unwrap(), Decimal::from(30));
    assert!(f.ledger.event_summary(f.event_id, f.bob).await.is_ok());
}

#[tokio::test]
async fn test_overflowing_stored_activity_fails_only_its_queries() {
    let f = fixture().await;
    let draft = ActivityDraft::new("Dinner").with_item(item("Steak", 1000, &[(f.bob, 1000)]));
    f.ledger.create_activity(f.event_id, f.alice, draft).await.unwrap();
    let other_event = f
        .ledger
        .create_event(f.bob, EventDraft::new("Porto", Utc::now(), vec![f.carol]))
        .await
        .unwrap();
    let draft = ActivityDraft::new("Lunch").with_item(item("Soup", 12, &[(f.carol, 12)]));
    f.ledger.create_activity(other_event, f.bob, draft).await.unwrap();

    // Rows written outside validation, e.g. by an older build
    let mut snapshot = f.ledger.snapshot().await.unwrap();
    f.ledger.shutdown().await.unwrap();
    for event in &mut snapshot.events {
        if event.id == f.event_id {
            event.activities[0].gratuity = Gratuity::Percent(Decimal::MAX);
        }
    }
    let ledger = Ledger::with_gateway(Config::in_memory(), Arc::new(MemoryGateway::with_snapshot(snapshot)))
        .await
        .unwrap();

    assert!(matches!(
        ledger.net_amount_between(f.event_id, f.alice, f.bob).await,
        Err(Error::AmountOverflow(_))
    ));
    assert!(matches!(
        ledger.event_summary(f.event_id, f.alice).await,
        Err(Error::AmountOverflow(_))
    ));

    // The writer is still alive for everything else
    ledger.register_user("Dave", "dave@example.com").await.unwrap();
    assert_eq!(ledger.net_amount_between(other_event, f.bob, f.carol).await.unwrap(), Decimal::from(12));
    ledger.shutdown().await.unwrap();
}
