//! Exchange connectivity boundary
//!
//! Everything the execution core knows about venues lives behind the
//! `ExchangeClient` trait defined here.

pub mod errors;
pub mod paper;
pub mod test_utils;
pub mod traits;
pub mod types;

pub use errors::{ExchangeError, ExchangeResult};
pub use paper::PaperExchange;
pub use traits::ExchangeClient;
pub use types::{
    BookEvent, BookEventKind, InstrumentClass, OrderAck, OrderRequest, RawLevel, Side, TopOfBook,
};
