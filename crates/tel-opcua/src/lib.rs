//! OPC UA driver for the gateway, built on the `async-opcua` client.
//!
//! Implements the collaborator traits of `tel-protocol`: endpoint
//! discovery, session establishment with the configured security policy
//! and identity, and reporting subscriptions whose monitored items keep
//! only the latest value. The stack's notification callback is bridged
//! onto a bounded channel so handler backpressure never blocks the
//! session event loop; overflow is counted as dropped.

mod convert;
mod session;
mod subscription;

use std::time::Duration;

use async_trait::async_trait;
use opcua::client::{Client, ClientBuilder, IdentityToken};
use opcua::types as ua;
use tel_protocol::{
    ApplicationCertificate, EndpointDescription, SessionOptions, SourceDriver, SourceError,
    UserIdentity,
};
use tracing::{debug, info};

pub use session::{OpcUaMonitor, OpcUaSession};
pub use subscription::OpcUaSubscription;

#[derive(Clone, Debug)]
pub struct OpcUaDriver {
    application_name: String,
}

impl OpcUaDriver {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
        }
    }
}

fn build_client(
    application_name: &str,
    certificate: Option<&ApplicationCertificate>,
    reconnect: Option<Duration>,
) -> Result<Client, SourceError> {
    let mut builder = ClientBuilder::new()
        .application_name(application_name)
        .application_uri(format!("urn:{application_name}:client"))
        .product_uri(format!("urn:{application_name}"))
        .trust_server_certs(true)
        .create_sample_keypair(false);
    builder = match reconnect {
        Some(interval) => builder.session_retry_initial(interval),
        None => builder.session_retry_limit(0),
    };
    if let Some(certificate) = certificate {
        builder = builder
            .certificate_path(&certificate.certificate_path)
            .private_key_path(&certificate.private_key_path);
        if let Some(dir) = certificate.certificate_path.parent() {
            builder = builder.pki_dir(dir);
        }
    }
    builder
        .client()
        .map_err(|errors| SourceError::Session(format!("client configuration: {}", errors.join("; "))))
}

fn identity_token(identity: &UserIdentity) -> IdentityToken {
    match identity {
        UserIdentity::Anonymous => IdentityToken::Anonymous,
        UserIdentity::UserName { username, password } => {
            IdentityToken::UserName(username.clone(), password.clone().into())
        }
        UserIdentity::Certificate {
            certificate_path,
            private_key_path,
        } => IdentityToken::X509(certificate_path.clone(), private_key_path.clone()),
    }
}

#[async_trait]
impl SourceDriver for OpcUaDriver {
    type Session = OpcUaSession;

    async fn discover(&self, url: &str) -> Result<Vec<EndpointDescription>, SourceError> {
        let client = build_client(&self.application_name, None, None)?;
        let raw = client
            .get_server_endpoints_from_url(url)
            .await
            .map_err(|status| SourceError::Discovery {
                url: url.to_string(),
                reason: status.to_string(),
            })?;
        let total = raw.len();
        let endpoints: Vec<EndpointDescription> =
            raw.iter().filter_map(convert::endpoint_from_ua).collect();
        debug!(%url, total, usable = endpoints.len(), "opc ua endpoints discovered");
        Ok(endpoints)
    }

    async fn open_session(
        &self,
        url: &str,
        options: SessionOptions,
    ) -> Result<OpcUaSession, SourceError> {
        let token = options.identity.token_type();
        if !options.endpoint.accepts(token) {
            return Err(SourceError::Session(format!(
                "endpoint does not accept {token:?} tokens"
            )));
        }
        let reconnect = options
            .auto_reconnect
            .then_some(options.reconnect_interval);
        let mut client = build_client(
            &options.application_name,
            options.certificate.as_ref(),
            reconnect,
        )?;

        let policy_uri = options.endpoint.security_policy.uri();
        let (session, event_loop) = client
            .connect_to_matching_endpoint(
                (
                    url,
                    policy_uri.as_str(),
                    convert::to_ua_mode(options.endpoint.security_mode),
                    ua::UserTokenPolicy::anonymous(),
                ),
                identity_token(&options.identity),
            )
            .await
            .map_err(|err| SourceError::Session(err.to_string()))?;

        let handle = event_loop.spawn();
        if !session.wait_for_connection().await {
            handle.abort();
            return Err(SourceError::Session(format!("{url} did not accept the session")));
        }
        info!(
            %url,
            policy = %options.endpoint.security_policy,
            mode = %options.endpoint.security_mode,
            "opc ua session established"
        );
        Ok(OpcUaSession::new(session, handle))
    }
}
