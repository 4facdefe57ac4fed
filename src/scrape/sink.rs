//! Reorder buffer releasing records in page order
//!
//! Pages settle in completion order but records leave the sink strictly by
//! slot: records of slot `i` are released only after every slot before it
//! has been filled and released.

use crate::extract::Record;
use std::collections::VecDeque;
use tokio::sync::mpsc;

#[derive(Debug)]
enum Slot {
    Pending,
    Ready(VecDeque<Record>),
    Released,
}

#[derive(Debug)]
enum SinkMode {
    Collect(Vec<Record>),
    Stream(mpsc::Sender<Record>),
}

/// Accumulates records for one scrape call
#[derive(Debug)]
pub struct ResultSink {
    slots: Vec<Slot>,
    next: usize,
    mode: SinkMode,
}

impl ResultSink {
    /// A sink retaining every record for [`ResultSink::collect`]
    pub fn collecting() -> Self {
        Self::with_mode(SinkMode::Collect(Vec::new()))
    }

    /// A sink handing records to `tx` as they are released
    pub fn streaming(tx: mpsc::Sender<Record>) -> Self {
        Self::with_mode(SinkMode::Stream(tx))
    }

    fn with_mode(mode: SinkMode) -> Self {
        Self {
            slots: Vec::new(),
            next: 0,
            mode,
        }
    }

    /// Reserves the next slot and returns its index
    pub fn reserve(&mut self) -> usize {
        self.slots.push(Slot::Pending);
        self.slots.len() - 1
    }

    /// Fills a pending slot; failed pages fill with no records
    ///
    /// Filling an unknown or already filled slot is ignored.
    pub fn fill(&mut self, index: usize, records: Vec<Record>) {
        match self.slots.get_mut(index) {
            Some(slot) if matches!(slot, Slot::Pending) => *slot = Slot::Ready(records.into()),
            _ => tracing::warn!("Ignoring records for unknown or settled slot {}", index),
        }
    }

    /// Whether every slot has been released
    pub fn is_drained(&self) -> bool {
        self.next == self.slots.len()
    }

    /// Releases every record whose slot and predecessors are filled
    ///
    /// In streaming mode this waits for channel capacity. Returns `false`
    /// when the receiving side has gone away.
    pub async fn flush(&mut self) -> bool {
        loop {
            let ready = match self.slots.get_mut(self.next) {
                Some(Slot::Ready(records)) => records,
                _ => return true,
            };

            if ready.is_empty() {
                self.slots[self.next] = Slot::Released;
                self.next += 1;
                continue;
            }

            match &mut self.mode {
                SinkMode::Collect(collected) => collected.extend(ready.drain(..)),
                SinkMode::Stream(tx) => {
                    // Take a permit first so an interrupted flush loses nothing
                    let Ok(permit) = tx.reserve().await else {
                        return false;
                    };
                    if let Some(record) = ready.pop_front() {
                        permit.send(record);
                    }
                }
            }
        }
    }

    /// Consumes the sink, returning the collected records in slot order
    ///
    /// Streaming sinks return nothing; their records went to the channel.
    pub fn collect(self) -> Vec<Record> {
        match self.mode {
            SinkMode::Collect(mut collected) => {
                for slot in self.slots.into_iter().skip(self.next) {
                    match slot {
                        Slot::Ready(records) => collected.extend(records),
                        Slot::Released => continue,
                        Slot::Pending => break,
                    }
                }
                collected
            }
            SinkMode::Stream(_) => Vec::new(),
        }
    }
}
