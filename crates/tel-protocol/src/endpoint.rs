use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const POLICY_URI_PREFIX: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SecurityPolicy {
    None,
    Basic128Rsa15,
    Basic256,
    Basic256Sha256,
    Aes128Sha256RsaOaep,
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    pub const ALL: [Self; 6] = [
        Self::None,
        Self::Basic128Rsa15,
        Self::Basic256,
        Self::Basic256Sha256,
        Self::Aes128Sha256RsaOaep,
        Self::Aes256Sha256RsaPss,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|policy| policy.as_str().eq_ignore_ascii_case(wanted))
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128_Sha256_RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256_Sha256_RsaPss",
        }
    }

    pub fn uri(self) -> String {
        format!("{POLICY_URI_PREFIX}{}", self.as_str())
    }

    /// Inverse of [`SecurityPolicy::uri`].
    pub fn from_uri(uri: &str) -> Option<Self> {
        let name = uri.trim().strip_prefix(POLICY_URI_PREFIX)?;
        Self::ALL.into_iter().find(|policy| policy.as_str() == name)
    }

    pub fn requires_certificate(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SecurityMode {
    None,
    Sign,
    SignAndEncrypt,
}

impl SecurityMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "sign" => Some(Self::Sign),
            "signandencrypt" => Some(Self::SignAndEncrypt),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UserTokenType {
    Anonymous,
    UserName,
    Certificate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointDescription {
    pub url: String,
    pub security_policy: SecurityPolicy,
    pub security_mode: SecurityMode,
    pub security_level: u8,
    pub user_token_types: Vec<UserTokenType>,
}

impl EndpointDescription {
    pub fn new(
        url: impl Into<String>,
        security_policy: SecurityPolicy,
        security_mode: SecurityMode,
        security_level: u8,
    ) -> Self {
        Self {
            url: url.into(),
            security_policy,
            security_mode,
            security_level,
            user_token_types: vec![
                UserTokenType::Anonymous,
                UserTokenType::UserName,
                UserTokenType::Certificate,
            ],
        }
    }

    pub fn accepts(&self, token: UserTokenType) -> bool {
        self.user_token_types.contains(&token)
    }
}

/// Picks the most secure endpoint advertising `policy` and `mode`.
pub fn select_endpoint(
    endpoints: &[EndpointDescription],
    policy: SecurityPolicy,
    mode: SecurityMode,
) -> Option<&EndpointDescription> {
    endpoints
        .iter()
        .filter(|ep| ep.security_policy == policy && ep.security_mode == mode)
        .max_by_key(|ep| ep.security_level)
}

#[derive(Clone, PartialEq, Eq)]
pub enum UserIdentity {
    Anonymous,
    UserName {
        username: String,
        password: String,
    },
    Certificate {
        certificate_path: PathBuf,
        private_key_path: PathBuf,
    },
}

impl UserIdentity {
    pub fn token_type(&self) -> UserTokenType {
        match self {
            Self::Anonymous => UserTokenType::Anonymous,
            Self::UserName { .. } => UserTokenType::UserName,
            Self::Certificate { .. } => UserTokenType::Certificate,
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Certificate {
                certificate_path,
                private_key_path,
            } => f
                .debug_struct("Certificate")
                .field("certificate_path", certificate_path)
                .field("private_key_path", private_key_path)
                .finish(),
        }
    }
}

/// Application instance certificate presented on secured channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationCertificate {
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub application_name: String,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
    pub endpoint: EndpointDescription,
    pub identity: UserIdentity,
    pub certificate: Option<ApplicationCertificate>,
}
