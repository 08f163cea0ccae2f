use std::{
    future::Future,
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use serde::Deserialize;
use spymeo_common::{Signal, internal, logging};
use spymeo_control::{ControlServer, DEFAULT_CONTROL_SOCKET};
use spymeo_mail::{
    EmailMessage, HttpMailer, MailConfig, MailError, MailQueue, Mailer, SendReceipt,
};
use tokio::sync::broadcast;

use crate::control_handler::SpymeoControlHandler;

fn default_socket() -> PathBuf {
    PathBuf::from(DEFAULT_CONTROL_SOCKET)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Path of the Unix socket `spymeoctl` talks to
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Spymeo {
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Collaborator installed when delivery is disabled. The queue completes jobs
/// itself in dry-run mode, so this is never asked to send anything.
struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _message: &EmailMessage) -> Result<SendReceipt, MailError> {
        Err(MailError::Configuration(
            "email delivery is disabled".to_string(),
        ))
    }
}

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Spymeo {
    /// Run the service until SIGINT or SIGTERM
    ///
    /// # Errors
    ///
    /// This function will return an error if logging is already initialised,
    /// the delivery collaborator or queue cannot be built, or the control
    /// socket cannot be bound.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init()?;

        let ret = self.serve(SHUTDOWN_BROADCAST.clone(), shutdown()).await;

        internal!("Shutting down...");

        ret
    }

    /// Wire the queue and control server together and run both until a
    /// [`Signal`] arrives on `signals` or `stop` resolves.
    ///
    /// # Errors
    ///
    /// If the mailer, the queue or the control server cannot be started
    pub async fn serve<F>(self, signals: broadcast::Sender<Signal>, stop: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send,
    {
        let mailer: Arc<dyn Mailer> = if self.mail.enabled {
            Arc::new(HttpMailer::from_config(&self.mail.provider)?)
        } else {
            Arc::new(DisabledMailer)
        };

        let queue = MailQueue::new(self.mail, mailer)?;
        let handler = Arc::new(SpymeoControlHandler::new(Arc::new(queue.clone())));
        let server = ControlServer::new(self.control.socket, handler)?;

        internal!(
            level = INFO,
            "Controller running, control socket at {}",
            server.socket_path().display()
        );

        let control = server.serve(signals.subscribe());
        let maintenance = queue.serve(signals.subscribe());

        let services = async {
            tokio::try_join!(async { control.await.map_err(anyhow::Error::from) }, async {
                maintenance.await;
                Ok::<(), anyhow::Error>(())
            })
            .map(|_| ())
        };

        tokio::select! {
            r = services => r,
            r = stop => r,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let spymeo: Spymeo = ron::from_str("()").unwrap();

        assert_eq!(spymeo.mail, MailConfig::default());
        assert_eq!(spymeo.control.socket, PathBuf::from(DEFAULT_CONTROL_SOCKET));
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let spymeo: Spymeo = ron::from_str(include_str!("../../spymeo.config.ron")).unwrap();

        assert_eq!(spymeo.mail, MailConfig::default());
        assert_eq!(spymeo.control.socket, PathBuf::from(DEFAULT_CONTROL_SOCKET));
    }

    #[test]
    fn config_overrides_are_read() {
        let spymeo: Spymeo = ron::from_str(
            r#"(
                mail: (
                    enabled: false,
                    default_from: "Ops <ops@spymeo.fr>",
                    rate_limit: (max_per_second: 5),
                ),
                control: (socket: "/run/spymeo/control.sock"),
            )"#,
        )
        .unwrap();

        assert_eq!(spymeo.mail.default_from, "Ops <ops@spymeo.fr>");
        assert_eq!(spymeo.mail.rate_limit.max_per_second, 5);
        assert_eq!(spymeo.mail.rate_limit.max_per_minute, 1000);
        assert_eq!(
            spymeo.control.socket,
            PathBuf::from("/run/spymeo/control.sock")
        );
    }

    #[tokio::test]
    async fn disabled_mailer_refuses_to_send() {
        let message = EmailMessage::builder()
            .to("someone@example.com")
            .from("noreply@spymeo.fr")
            .subject("hello")
            .html("<p>hi</p>")
            .build()
            .unwrap();

        assert!(matches!(
            DisabledMailer.send(&message).await,
            Err(MailError::Configuration(_))
        ));
    }
}
