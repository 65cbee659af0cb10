pub mod bus;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod inbound;

pub use bus::{channel, BusMessage, BusSender};
pub use consumer::{BusConsumer, LogNavigator, Navigator};
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use handlers::{HandlerState, SilentHandler};
pub use inbound::{InboundMessage, NotificationContent};
