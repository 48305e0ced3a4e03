//! Domain - ドメインモデル
//!
//! ids, signal_type, event, constraint, config, state, errors

pub mod config;
pub mod constraint;
pub mod errors;
pub mod event;
pub mod ids;
pub mod signal_type;
pub mod state;

pub use self::config::{MqttConfig, NatsConfig, QoS, SignalConfig, SourceConfig};
pub use self::constraint::{ConstraintViolation, InvalidTimeWindow, SignalConstraints, TimeWindow};
pub use self::errors::{DecodeError, SignalError, TransportError};
pub use self::event::{Event, SourceMessage};
pub use self::ids::{EventId, SessionId};
pub use self::signal_type::SignalType;
pub use self::state::SignalState;
