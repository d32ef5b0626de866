use crate::{TrainObserver, TrainStatus};

/// Sends every status to all of its observers, in insertion order.
pub struct ForwardObserver {
    observers: Vec<Box<dyn TrainObserver>>,
}

impl TrainObserver for ForwardObserver {
    fn send_status(&self, status: &TrainStatus) {
        self.observers.iter().for_each(|v| v.send_status(status))
    }
}

#[derive(Default)]
pub struct ForwardObserverBuilder(Vec<Box<dyn TrainObserver>>);

impl ForwardObserverBuilder {
    pub fn new() -> Self {
        ForwardObserverBuilder(Vec::default())
    }

    pub fn add_observer<O: TrainObserver + 'static>(mut self, observer: O) -> Self {
        self.0.push(Box::new(observer));
        self
    }

    pub fn build(self) -> ForwardObserver {
        ForwardObserver { observers: self.0 }
    }
}
