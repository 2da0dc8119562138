//! Bounded FIFO windows backing the dashboard charts.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of samples kept for each chart series.
pub const WINDOW_CAPACITY: usize = 60;

/// One labelled chart value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

impl ChartPoint {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Chronological sequence holding at most `capacity` items.
///
/// Pushing onto a full window evicts the oldest item first, so `len()`
/// never exceeds the capacity.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    /// Create an empty window. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, returning the evicted head if the window was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> RollingWindow<T> {
    /// Copy of the contents, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Receive and transmit series that always advance together.
#[derive(Debug, Clone)]
pub struct NetworkWindow {
    receive: RollingWindow<ChartPoint>,
    transmit: RollingWindow<ChartPoint>,
}

impl NetworkWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            receive: RollingWindow::new(capacity),
            transmit: RollingWindow::new(capacity),
        }
    }

    /// Append one receive/transmit pair under a shared label.
    pub fn push(&mut self, label: &str, receive_rate: f64, transmit_rate: f64) {
        self.receive.push(ChartPoint::new(label, receive_rate));
        self.transmit.push(ChartPoint::new(label, transmit_rate));
        debug_assert_eq!(self.receive.len(), self.transmit.len());
    }

    pub fn len(&self) -> usize {
        self.receive.len()
    }

    pub fn receive(&self) -> &RollingWindow<ChartPoint> {
        &self.receive
    }

    pub fn transmit(&self) -> &RollingWindow<ChartPoint> {
        &self.transmit
    }
}
