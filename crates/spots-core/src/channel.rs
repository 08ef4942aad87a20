use tokio::sync::watch;

/// Receiver side handed to observers. Dropping it unsubscribes.
pub type StateStream<T> = watch::Receiver<T>;

/// Single-writer snapshot channel.
///
/// Observers only ever see immutable clones of the state; the owner is the
/// sole mutator.
#[derive(Debug)]
pub struct StatePublisher<T> {
    tx: watch::Sender<T>,
}

impl<T> StatePublisher<T>
where
    T: Clone + PartialEq,
{
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> StateStream<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Replace the snapshot. Subscribers are woken only when the value changed.
    pub fn publish(&self, next: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}
