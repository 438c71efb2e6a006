pub mod callback;
pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

pub use callback::{QueryCallback, QueryResult};
pub use error::BrokerError;
pub use mock::{MockCall, MockElementOperator};
pub use traits::{ElementOperator, IdentityResolver, WindowIdResolver};
pub use types::{
    composite, AccountId, AuthToken, ElementId, ElementInfo, QueryPayload, RequestId, SearchMode,
    TreeId, WindowId, INVALID_ELEMENT_ID, INVALID_WINDOW_ID, MAIN_TREE_ID,
};
