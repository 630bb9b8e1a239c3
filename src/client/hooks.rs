//! Caller-registered lifecycle hooks

use crate::error::ClientError;

pub type ConnectHook = Box<dyn FnMut() + Send>;
pub type DisconnectHook = Box<dyn FnMut() + Send>;
pub type ErrorHook = Box<dyn FnMut(&ClientError) + Send>;
pub type LogHook = Box<dyn FnMut(&str) + Send>;

/// The four hooks a caller may register. Unset hooks are skipped.
#[derive(Default)]
pub struct Hooks {
    on_connect: Option<ConnectHook>,
    on_disconnect: Option<DisconnectHook>,
    on_error: Option<ErrorHook>,
    on_log: Option<LogHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_log", &self.on_log.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn set_on_connect(&mut self, hook: ConnectHook) {
        self.on_connect = Some(hook);
    }

    pub fn set_on_disconnect(&mut self, hook: DisconnectHook) {
        self.on_disconnect = Some(hook);
    }

    pub fn set_on_error(&mut self, hook: ErrorHook) {
        self.on_error = Some(hook);
    }

    pub fn set_on_log(&mut self, hook: LogHook) {
        self.on_log = Some(hook);
    }

    pub(crate) fn connected(&mut self) {
        if let Some(hook) = self.on_connect.as_mut() {
            hook();
        }
    }

    pub(crate) fn disconnected(&mut self) {
        if let Some(hook) = self.on_disconnect.as_mut() {
            hook();
        }
    }

    pub(crate) fn error(&mut self, error: &ClientError) {
        tracing::warn!(target: "mqtt_client", "{}", error);
        if let Some(hook) = self.on_error.as_mut() {
            hook(error);
        }
    }

    pub(crate) fn log(&mut self, line: &str) {
        tracing::info!(target: "mqtt_client", "{}", line);
        if let Some(hook) = self.on_log.as_mut() {
            hook(line);
        }
    }

    /// Traffic lines go to trace level rather than info
    pub(crate) fn trace(&mut self, line: &str) {
        tracing::trace!(target: "mqtt_client", "{}", line);
        if let Some(hook) = self.on_log.as_mut() {
            hook(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_unset_hooks_are_skipped() {
        let mut hooks = Hooks::default();
        hooks.connected();
        hooks.disconnected();
        hooks.error(&ClientError::KeepAliveTimeout);
        hooks.log("nothing registered");
    }

    #[test]
    fn test_registered_hooks_fire() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::default();

        let sink = events.clone();
        hooks.set_on_connect(Box::new(move || sink.lock().unwrap().push("connect".to_string())));
        let sink = events.clone();
        hooks.set_on_error(Box::new(move |e: &ClientError| {
            sink.lock().unwrap().push(e.to_string())
        }));
        let sink = events.clone();
        hooks.set_on_log(Box::new(move |line: &str| sink.lock().unwrap().push(line.to_string())));

        hooks.connected();
        hooks.error(&ClientError::KeepAliveTimeout);
        hooks.log("Socket connection opened.");
        hooks.disconnected();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["connect", "Timeout", "Socket connection opened."]
        );
    }
}
