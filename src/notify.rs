use crate::config::NotifierKind;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    Failed { command: String, status: String },
}

/// Destination for reminder and confirmation messages
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str, timeout: Duration) -> Result<(), NotifyError>;
}

/// Send a notification, logging instead of failing
pub fn deliver(notifier: &dyn Notifier, title: &str, message: &str, timeout: Duration) {
    if let Err(e) = notifier.notify(title, message, timeout) {
        tracing::warn!(error = %e, title, "Notification not delivered");
    }
}

/// Writes notifications to the log and the console
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str, _timeout: Duration) -> Result<(), NotifyError> {
        tracing::info!(title, message, "Notification");
        println!("[{}] {}", title, message);
        Ok(())
    }
}

/// Desktop popups through `notify-send`
pub struct DesktopNotifier {
    command: String,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            command: "notify-send".to_string(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str, timeout: Duration) -> Result<(), NotifyError> {
        let status = Command::new(&self.command)
            .arg("-t")
            .arg(timeout.as_millis().to_string())
            .arg(title)
            .arg(message)
            .status()
            .map_err(|source| NotifyError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(NotifyError::Failed {
                command: self.command.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

pub fn notifier_for(kind: NotifierKind) -> Box<dyn Notifier> {
    match kind {
        NotifierKind::Log => Box::new(LogNotifier),
        NotifierKind::Desktop => Box::new(DesktopNotifier::new()),
    }
}

/// Captures notifications for assertions
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: std::sync::Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str, _timeout: Duration) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
        if self.fail {
            return Err(NotifyError::Failed {
                command: "test".into(),
                status: "exit status: 1".into(),
            });
        }
        Ok(())
    }
}
