//! Ordered event delivery to the display layer.

use tokio::sync::mpsc;

/// Something the terminal display should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Output(String),
    Status(String),
    Error(String),
    Disconnected,
}

/// Events in arrival order. Ends when the client and its tasks are gone.
pub type EventStream = mpsc::UnboundedReceiver<ClientEvent>;

/// Callback surface for a terminal display. Every method defaults to a no-op.
pub trait TerminalHandler {
    fn on_output(&mut self, _data: &str) {}
    fn on_status(&mut self, _message: &str) {}
    fn on_error(&mut self, _message: &str) {}
    fn on_connect(&mut self) {}
    fn on_disconnect(&mut self) {}
}

/// Deliver `event` to the matching callback.
pub fn deliver(event: &ClientEvent, handler: &mut impl TerminalHandler) {
    match event {
        ClientEvent::Connected => handler.on_connect(),
        ClientEvent::Output(data) => handler.on_output(data),
        ClientEvent::Status(message) => handler.on_status(message),
        ClientEvent::Error(message) => handler.on_error(message),
        ClientEvent::Disconnected => handler.on_disconnect(),
    }
}

/// The single dispatch loop: drains `events` into `handler` until the stream ends.
pub async fn dispatch(mut events: EventStream, handler: &mut impl TerminalHandler) {
    while let Some(event) = events.recv().await {
        deliver(&event, handler);
    }
}
