//! Multi-producer/multi-consumer work queues with an explicit STOP
//! sentinel, standing in for a kernel message queue between supervisor
//! and worker threads. Built on `crossbeam_channel`, the same crate a
//! thread-pool-style worker handler elsewhere in this codebase uses.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

/// An envelope a [`Queue`] carries: either one unit of work, or a STOP
/// instructing a consumer to exit its loop. A plain `Option<T>` would
/// work too, but the named variants read better at call sites and make
/// `send_stop_to_all` self-documenting.
#[derive(Debug, Clone)]
pub enum Message<T> {
    Work(T),
    Stop,
}

/// An MPMC queue of [`Message<T>`], bounded or not. Producers and
/// consumers each hold a clone of the relevant end; closing happens by
/// sending one `Stop` per consumer rather than dropping the channel, so
/// a consumer blocked in `recv()` always wakes up to a well-defined
/// instruction instead of a channel-closed error.
pub struct Queue<T> {
    tx: Sender<Message<T>>,
    rx: Receiver<Message<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Queue<T> {
    /// `capacity` bounds in-flight work items, the same way a kernel
    /// message queue bounds pending messages. Spec §4.4 states `send`
    /// never blocks once the queue is created, so this constructor is
    /// only appropriate where the caller genuinely wants backpressure
    /// over that contract; the pipeline's own work queues use
    /// [`Queue::unbounded`].
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Queue { tx, rx }
    }

    /// An unbounded queue: `send_work`/`send_stop_to_all` never block,
    /// matching spec §4.4's "`send` never blocks once the queue is
    /// created" for the copy/index/vacuum work queues.
    pub fn unbounded() -> Self {
        let (tx, rx) = unbounded();
        Queue { tx, rx }
    }

    pub fn send_work(&self, item: T) -> Result<(), crossbeam_channel::SendError<Message<T>>> {
        self.tx.send(Message::Work(item))
    }

    /// Enqueues one `Stop` per consumer. Each worker thread consumes
    /// exactly one `Stop` and exits; the supervisor counts acknowledged
    /// stops to know when the whole pool has drained.
    pub fn send_stop_to_all(&self, consumers: usize) -> Result<(), crossbeam_channel::SendError<Message<T>>> {
        for _ in 0..consumers {
            self.tx.send(Message::Stop)?;
        }
        Ok(())
    }

    pub fn recv(&self) -> Result<Message<T>, crossbeam_channel::RecvError> {
        self.rx.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_exits_on_stop() {
        let q: Queue<i32> = Queue::bounded(4);
        q.send_work(1).unwrap();
        q.send_work(2).unwrap();
        q.send_stop_to_all(1).unwrap();

        let mut seen = Vec::new();
        loop {
            match q.recv().unwrap() {
                Message::Work(v) => seen.push(v),
                Message::Stop => break,
            }
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn stop_count_matches_consumer_count() {
        let q: Queue<()> = Queue::bounded(8);
        q.send_stop_to_all(3).unwrap();

        let mut stops = 0;
        for _ in 0..3 {
            if let Message::Stop = q.recv().unwrap() {
                stops += 1;
            }
        }
        assert_eq!(stops, 3);
    }
}
