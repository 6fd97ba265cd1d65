use std::{fmt, net::SocketAddr};

use crate::peer::ClientId;

/// One line of text on its way to every registered client.
///
/// Chat lines remember which client sent them so the hub can skip echoing
/// them back; system lines (arrivals, departures) have no origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: Option<ClientId>,
    text: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            origin: None,
            text: text.into(),
        }
    }

    pub fn from_client(origin: ClientId, text: impl Into<String>) -> Self {
        Self {
            origin: Some(origin),
            text: text.into(),
        }
    }

    pub fn origin(&self) -> Option<ClientId> {
        self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether `client` should receive this message.
    pub fn is_for(&self, client: ClientId) -> bool {
        self.origin != Some(client)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Private line sent to a client right after it connects.
pub fn welcome(peer: SocketAddr) -> String {
    format!("You are {peer}")
}

pub fn arrived(peer: SocketAddr) -> Message {
    Message::system(format!("{peer} has arrived"))
}

pub fn left(peer: SocketAddr) -> Message {
    Message::system(format!("{peer} has left"))
}

pub fn chat(origin: ClientId, peer: SocketAddr, line: &str) -> Message {
    Message::from_client(origin, format!("{peer}: {line}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9001".parse().expect("valid socket address")
    }

    #[test]
    fn lines_use_peer_address() {
        assert_eq!(welcome(addr()), "You are 127.0.0.1:9001");
        assert_eq!(arrived(addr()).text(), "127.0.0.1:9001 has arrived");
        assert_eq!(left(addr()).text(), "127.0.0.1:9001 has left");
        assert_eq!(
            chat(ClientId::new(7), addr(), "hello").text(),
            "127.0.0.1:9001: hello"
        );
    }

    #[test]
    fn chat_is_not_for_its_sender() {
        let sender = ClientId::new(1);
        let message = chat(sender, addr(), "hi");

        assert!(!message.is_for(sender));
        assert!(message.is_for(ClientId::new(2)));
    }

    #[test]
    fn system_lines_reach_everyone() {
        let message = arrived(addr());
        assert_eq!(message.origin(), None);
        assert!(message.is_for(ClientId::new(1)));
    }
}
