//! Routes inbound channel frames to the handler registered for them
//!
//! A registration is keyed by `(namespace, command, correlation id)`; a frame
//! reaches a handler only when all three match exactly. Frames nobody is
//! waiting for are dropped with a log line, never an error.

use std::collections::HashMap;

use serde_json::{Map, Value};
use termhub_types::{ChannelFrame, CommandRequest, ControlFrame, CorrelationId, ProtocolError};

/// Callback invoked with a frame's payload and the args stored at registration
pub type CommandHandler = Box<dyn FnMut(&Value, &[Value]) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub namespace: String,
    pub command: String,
    pub correlation_id: CorrelationId,
}

impl RouteKey {
    pub fn new(namespace: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            command: command.into(),
            correlation_id: CorrelationId::default(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    fn of(frame: &ChannelFrame) -> Self {
        Self {
            namespace: frame.namespace.clone(),
            command: frame.command.clone(),
            correlation_id: frame.correlation_id.clone(),
        }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.namespace, self.command, self.correlation_id)
    }
}

pub struct Registration {
    handler: CommandHandler,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl Registration {
    pub fn new(handler: impl FnMut(&Value, &[Value]) + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Unmatched,
    Malformed(ProtocolError),
}

#[derive(Debug, Default)]
pub struct CommandRouter {
    routes: HashMap<RouteKey, Registration>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; a later registration for the same key replaces the earlier one
    ///
    /// Returns whether an existing registration was replaced.
    pub fn register(
        &mut self,
        key: RouteKey,
        registration: Registration,
    ) -> Result<bool, ProtocolError> {
        if key.command.is_empty() {
            return Err(ProtocolError::InvalidRegistration(
                "command must not be empty".to_string(),
            ));
        }
        log::debug!("Registering handler for {}", key);
        Ok(self.routes.insert(key, registration).is_some())
    }

    pub fn deregister(&mut self, key: &RouteKey) -> bool {
        self.routes.remove(key).is_some()
    }

    /// Drop every registration waiting on `correlation_id`, returning how many were removed
    pub fn deregister_correlation(&mut self, correlation_id: &CorrelationId) -> usize {
        let before = self.routes.len();
        self.routes
            .retain(|key, _| &key.correlation_id != correlation_id);
        before - self.routes.len()
    }

    pub fn contains(&self, key: &RouteKey) -> bool {
        self.routes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn dispatch(&mut self, raw: &str) -> DispatchOutcome {
        match ChannelFrame::parse(raw) {
            Ok(frame) => self.dispatch_frame(&frame),
            Err(e) => {
                log::warn!("Dropping malformed frame: {}", e);
                DispatchOutcome::Malformed(e)
            }
        }
    }

    pub fn dispatch_frame(&mut self, frame: &ChannelFrame) -> DispatchOutcome {
        let key = RouteKey::of(frame);
        match self.routes.get_mut(&key) {
            Some(registration) => {
                (registration.handler)(&frame.data, &registration.args);
                DispatchOutcome::Delivered
            }
            None => {
                log::debug!("No handler registered for {}", key);
                DispatchOutcome::Unmatched
            }
        }
    }

    /// Register a response handler for `request` and build the frame that sends it
    ///
    /// The handler is keyed on the request's `unique_id`, so the server's reply
    /// must echo it back.
    pub fn request(
        &mut self,
        namespace: impl Into<String>,
        request: CommandRequest,
        registration: Registration,
    ) -> Result<String, ProtocolError> {
        let key = RouteKey {
            namespace: namespace.into(),
            command: request.func_name.clone(),
            correlation_id: request.unique_id.clone(),
        };
        self.register(key, registration)?;
        Ok(ControlFrame::Command { data: request }.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<(Value, Vec<Value>)>>>;

    fn recorder(calls: &Calls) -> Registration {
        let calls = Arc::clone(calls);
        Registration::new(move |data, args| {
            calls.lock().unwrap().push((data.clone(), args.to_vec()));
        })
    }

    #[test]
    fn test_exact_match_delivers_with_stored_args() {
        let calls = Calls::default();
        let mut router = CommandRouter::new();
        let key = RouteKey::new("files", "list").with_correlation(7i64);
        router
            .register(key, recorder(&calls).with_args(vec![json!("ctx")]))
            .unwrap();

        let outcome = router.dispatch(r#"{"app":"files","cmd":"list","unique_id":7,"data":[1]}"#);
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(
            calls.lock().unwrap().clone(),
            vec![(json!([1]), vec![json!("ctx")])]
        );
    }

    #[test]
    fn test_partial_match_is_not_delivered() {
        let calls = Calls::default();
        let mut router = CommandRouter::new();
        router
            .register(RouteKey::new("files", "list").with_correlation(7i64), recorder(&calls))
            .unwrap();

        for raw in [
            r#"{"app":"files","cmd":"list","unique_id":8}"#,
            r#"{"app":"files","cmd":"stat","unique_id":7}"#,
            r#"{"app":"other","cmd":"list","unique_id":7}"#,
        ] {
            assert_eq!(router.dispatch(raw), DispatchOutcome::Unmatched);
        }
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let first = Calls::default();
        let second = Calls::default();
        let mut router = CommandRouter::new();
        let key = RouteKey::new("chat", "reply");

        assert_eq!(router.register(key.clone(), recorder(&first)), Ok(false));
        assert_eq!(router.register(key, recorder(&second)), Ok(true));
        assert_eq!(router.len(), 1);

        router.dispatch(r#"{"namespace":"chat","command":"reply","correlationId":0}"#);
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_numeric_string_correlation_matches_number() {
        let calls = Calls::default();
        let mut router = CommandRouter::new();
        router
            .register(RouteKey::new("a", "b").with_correlation(5i64), recorder(&calls))
            .unwrap();
        assert_eq!(
            router.dispatch(r#"{"app":"a","cmd":"b","unique_id":"5"}"#),
            DispatchOutcome::Delivered
        );
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let mut router = CommandRouter::new();
        assert!(matches!(
            router.dispatch("{oops"),
            DispatchOutcome::Malformed(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(
            router.dispatch(r#"{"app":"a","unique_id":1}"#),
            DispatchOutcome::Malformed(ProtocolError::MissingField("command"))
        );
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let mut router = CommandRouter::new();
        let result = router.register(RouteKey::new("a", ""), Registration::new(|_, _| {}));
        assert!(matches!(result, Err(ProtocolError::InvalidRegistration(_))));
        assert!(router.is_empty());
    }

    #[test]
    fn test_deregistration() {
        let mut router = CommandRouter::new();
        let a = RouteKey::new("x", "one").with_correlation("req-1");
        let b = RouteKey::new("x", "two").with_correlation("req-1");
        let c = RouteKey::new("x", "one").with_correlation("req-2");
        for key in [&a, &b, &c] {
            router
                .register(key.clone(), Registration::new(|_, _| {}))
                .unwrap();
        }

        assert_eq!(router.deregister_correlation(&CorrelationId::from("req-1")), 2);
        assert!(router.contains(&c));
        assert!(router.deregister(&c));
        assert!(!router.deregister(&c));
        assert!(router.is_empty());
    }

    #[test]
    fn test_request_registers_reply_handler() {
        let calls = Calls::default();
        let mut router = CommandRouter::new();
        let request = CommandRequest::new("list_files", CorrelationId::from("abc"))
            .with_args(vec![json!("/tmp")]);
        let frame = router.request("files", request, recorder(&calls)).unwrap();

        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["data"]["func_name"], "list_files");
        assert_eq!(value["data"]["unique_id"], "abc");

        let reply = r#"{"app":"files","cmd":"list_files","unique_id":"abc","data":["a.txt"]}"#;
        assert_eq!(router.dispatch(reply), DispatchOutcome::Delivered);
        assert_eq!(calls.lock().unwrap()[0].0, json!(["a.txt"]));
    }
}
