use super::subscriber::Subscriber;
use tokio::sync::mpsc;

#[test]
fn test_subscriber_new() {
    let (tx, _) = mpsc::channel(1);
    let subscriber = Subscriber::new(tx);
    assert!(!subscriber.id.is_empty());
}

#[test]
fn test_subscriber_ids_are_unique() {
    let (a, _rx_a) = Subscriber::channel(4);
    let (b, _rx_b) = Subscriber::channel(4);
    assert_ne!(a.id, b.id);
}

#[test]
fn test_zero_capacity_is_raised_to_one() {
    let (subscriber, _rx) = Subscriber::channel(0);
    assert_eq!(subscriber.sender.max_capacity(), 1);
}
