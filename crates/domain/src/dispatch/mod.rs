/// Device commands, the outbound queue and publishers
pub mod outbound;

/// The periodic dispatch loop
pub mod worker;

pub use outbound::{
    command_queue, run_publisher, CommandPublisher, CommandReceiver, CommandSender, DeviceCommand,
    LogPublisher, PublishError,
};
pub use worker::{CycleReport, DispatchConfig, Dispatcher};
