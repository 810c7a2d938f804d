pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{GlobalTxId, LocalTxId};
pub use error::{Result, TxLogError};
pub use event::{EventId, EventType, TxEvent, TxEventBuilder, TxStatus};
pub use memory::InMemoryTxLogStore;
pub use postgres::PostgresTxLogStore;
pub use query::TxEventQuery;
pub use store::TxLogStore;
