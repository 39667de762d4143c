//! Upstream side of the gateway: the MQTT adapter, the topic router and the
//! relay loop that feeds routed events into an [`events::EventPublisher`].

pub mod error;
pub mod mqtt;
pub mod publisher;
pub mod relay;
pub mod router;

pub use error::{Error, ErrorKind};
pub use mqtt::{MqttAdapter, MqttSettings};
pub use publisher::{
    status_channel, MqttPublisher, PublishOptions, Publisher, StatusReceiver,
    StatusSender, UpstreamStatus,
};
pub use relay::{Relay, UpstreamEvent};
pub use router::TopicRouter;
