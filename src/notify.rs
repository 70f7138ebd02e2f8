use crate::collaborator::Collaborator;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertChannel {
    WhatsApp,
    Email,
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WhatsApp => write!(f, "whatsapp"),
            Self::Email => write!(f, "email"),
        }
    }
}

impl FromStr for AlertChannel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "whatsapp" | "wa" => Ok(Self::WhatsApp),
            "email" | "mail" => Ok(Self::Email),
            other => Err(format!(
                "unknown alert channel '{other}' (expected whatsapp or email)"
            )),
        }
    }
}

/// Hands a URL to whatever the host uses to open links.
pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Fire-and-forget alert dispatch. Independent of session state.
#[derive(Clone)]
pub struct Notifier {
    collaborator: Arc<dyn Collaborator>,
    request_timeout: Duration,
}

impl Notifier {
    pub fn new(collaborator: Arc<dyn Collaborator>, request_timeout: Duration) -> Self {
        Self {
            collaborator,
            request_timeout,
        }
    }

    /// Asks the server to deliver the alert. The returned handle may be dropped.
    pub fn dispatch_server(&self, channel: AlertChannel) -> JoinHandle<()> {
        let collaborator = Arc::clone(&self.collaborator);
        let request_timeout = self.request_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(request_timeout, collaborator.dispatch_alert(channel)).await
            {
                Ok(Ok(())) => info!(%channel, "alert dispatched"),
                Ok(Err(err)) => warn!(%channel, error = %err, "alert dispatch failed"),
                Err(_) => warn!(%channel, "alert dispatch timed out"),
            }
        })
    }

    pub async fn dispatch_deep_link(&self, channel: AlertChannel, opener: &dyn LinkOpener) {
        let url = match tokio::time::timeout(
            self.request_timeout,
            self.collaborator.alert_link(channel),
        )
        .await
        {
            Ok(Ok(url)) => url,
            Ok(Err(err)) => {
                warn!(%channel, error = %err, "failed to obtain alert link");
                return;
            }
            Err(_) => {
                warn!(%channel, "alert link request timed out");
                return;
            }
        };

        if let Err(err) = opener.open(&url) {
            warn!(%channel, error = %err, "failed to open alert link");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AlertChannel, LinkOpener, Notifier};
    use crate::fake::{Call, FakeCollaborator};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingOpener {
        opened: Mutex<Vec<String>>,
    }

    impl LinkOpener for RecordingOpener {
        fn open(&self, url: &str) -> std::io::Result<()> {
            self.opened.lock().push(url.to_owned());
            Ok(())
        }
    }

    #[test]
    fn channel_names_parse_loosely() {
        assert_eq!("WhatsApp".parse::<AlertChannel>(), Ok(AlertChannel::WhatsApp));
        assert_eq!(" email ".parse::<AlertChannel>(), Ok(AlertChannel::Email));
        assert!("sms".parse::<AlertChannel>().is_err());
    }

    #[tokio::test]
    async fn server_dispatch_reaches_collaborator() {
        let fake = Arc::new(FakeCollaborator::default());
        let notifier = Notifier::new(fake.clone(), Duration::from_secs(1));

        notifier
            .dispatch_server(AlertChannel::Email)
            .await
            .expect("dispatch task");

        assert_eq!(fake.calls(), vec![Call::DispatchAlert(AlertChannel::Email)]);
    }

    #[tokio::test]
    async fn server_dispatch_failure_is_swallowed() {
        let fake = Arc::new(FakeCollaborator::default());
        fake.fail_alerts();
        let notifier = Notifier::new(fake.clone(), Duration::from_secs(1));

        notifier
            .dispatch_server(AlertChannel::WhatsApp)
            .await
            .expect("dispatch task does not panic");
    }

    #[tokio::test]
    async fn deep_link_is_handed_to_opener() {
        let fake = Arc::new(FakeCollaborator::default());
        let notifier = Notifier::new(fake.clone(), Duration::from_secs(1));
        let opener = RecordingOpener::default();

        notifier
            .dispatch_deep_link(AlertChannel::WhatsApp, &opener)
            .await;

        assert_eq!(
            opener.opened.lock().clone(),
            vec!["https://wa.me/?text=alert".to_owned()]
        );
    }

    #[tokio::test]
    async fn missing_deep_link_opens_nothing() {
        let fake = Arc::new(FakeCollaborator::default());
        fake.fail_alerts();
        let notifier = Notifier::new(fake.clone(), Duration::from_secs(1));
        let opener = RecordingOpener::default();

        notifier.dispatch_deep_link(AlertChannel::Email, &opener).await;

        assert!(opener.opened.lock().is_empty());
        assert_eq!(fake.calls(), vec![Call::AlertLink(AlertChannel::Email)]);
    }
}
