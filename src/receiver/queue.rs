use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::wire::DataPacket;
use crate::common::MAX_BLOCKS;

/// Capacity of the reader → decoder queue, in packets.
pub const SYMBOL_QUEUE_BOUND: usize = 2 * MAX_BLOCKS as usize;

/// Bounded single-producer single-consumer FIFO between the receiver's
/// network reader and its decoder task. A full queue blocks the reader,
/// pushing back on the socket instead of buffering without bound.
pub fn symbol_queue() -> (Sender<DataPacket>, Receiver<DataPacket>) {
    bounded(SYMBOL_QUEUE_BOUND)
}

#[cfg(test)]
mod tests {
    use crate::common::wire::DataPacket;

    use super::{symbol_queue, SYMBOL_QUEUE_BOUND};

    fn packet(symbol_id: u32) -> DataPacket {
        DataPacket {
            symbol_id,
            payload: vec![0u8; 8],
        }
    }

    #[test]
    pub fn test_fifo_order() {
        let (tx, rx) = symbol_queue();
        for id in 0..10 {
            tx.send(packet(id)).unwrap();
        }
        for id in 0..10 {
            assert_eq!(rx.recv().unwrap().symbol_id, id);
        }
    }

    #[test]
    pub fn test_bounded() {
        let (tx, rx) = symbol_queue();
        for id in 0..SYMBOL_QUEUE_BOUND {
            tx.try_send(packet(id as u32)).unwrap();
        }
        assert!(tx.try_send(packet(0)).is_err());
        rx.recv().unwrap();
        tx.try_send(packet(0)).unwrap();
    }

    #[test]
    pub fn test_disconnect_observed_by_consumer() {
        let (tx, rx) = symbol_queue();
        drop(tx);
        assert!(rx.recv().is_err());
    }
}
