mod certs;
mod distributor;
mod epoch;
mod sink;
mod subscription;
mod supervisor;

#[cfg(test)]
mod test_support;

pub use certs::{ensure_key_pair, CertificateError};
pub use distributor::{Distributor, DistributorError};
pub use epoch::ConnectionEpoch;
pub use sink::{Sink, SinkContext, SinkError};
pub use subscription::{SubscriptionError, SubscriptionManager, SubscriptionSpec};
pub use supervisor::{
    connect, ConnectError, Supervisor, SupervisorError, SupervisorOptions, SupervisorState,
    SupervisorStatus,
};
