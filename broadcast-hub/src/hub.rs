//! The broadcast coordinator.
//!
//! One task owns the set of connected clients. Sessions never touch that
//! set directly; they send [`Event`]s through a [`Hub`] handle and the
//! control loop applies them one at a time, in the order they arrive.
//! Every sender's events keep their relative order because they all share
//! one channel.
//!
//! Client queues are unbounded, so fanning a message out never waits on a
//! slow reader. A client whose writer has died is evicted the next time a
//! delivery to it fails.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    message::Message,
    peer::{ClientHandle, ClientId},
};

/// How many events may wait for the control loop before senders suspend.
pub const EVENT_CAPACITY: usize = 64;

enum Event {
    Entry(ClientHandle),
    Leave(ClientHandle),
    Broadcast(Message),
    MemberCount { respond_to: oneshot::Sender<usize> },
}

/// Cloneable handle for submitting events to the coordinator.
///
/// The control loop exits once every `Hub` clone has been dropped.
#[derive(Clone)]
pub struct Hub {
    events: mpsc::Sender<Event>,
}

impl Hub {
    /// Starts the control loop on the current runtime.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (events, inbox) = mpsc::channel(EVENT_CAPACITY);
        let task = tokio::spawn(Coordinator::default().run(inbox));
        (Self { events }, task)
    }

    /// Registers `handle` so it receives every later broadcast.
    pub async fn entry(&self, handle: ClientHandle) -> Result<()> {
        self.submit(Event::Entry(handle)).await
    }

    /// Unregisters `handle`. The coordinator drops its copy and this one,
    /// closing the queue unless another clone is still alive elsewhere.
    pub async fn leave(&self, handle: ClientHandle) -> Result<()> {
        self.submit(Event::Leave(handle)).await
    }

    pub async fn broadcast(&self, message: Message) -> Result<()> {
        self.submit(Event::Broadcast(message)).await
    }

    /// Number of registered clients once every previously submitted event
    /// has been applied.
    pub async fn member_count(&self) -> Result<usize> {
        let (respond_to, response) = oneshot::channel();
        self.submit(Event::MemberCount { respond_to }).await?;
        response.await.context("hub dropped member count request")
    }

    async fn submit(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("hub is no longer running"))
    }
}

#[derive(Default)]
struct Coordinator {
    clients: HashMap<ClientId, ClientHandle>,
}

impl Coordinator {
    async fn run(mut self, mut inbox: mpsc::Receiver<Event>) {
        while let Some(event) = inbox.recv().await {
            self.apply(event);
        }
        debug!(members = self.clients.len(), "hub stopped");
    }

    fn apply(&mut self, event: Event) {
        match event {
            Event::Entry(handle) => self.register(handle),
            Event::Leave(handle) => self.remove(handle),
            Event::Broadcast(message) => self.broadcast(message),
            Event::MemberCount { respond_to } => {
                let _ = respond_to.send(self.clients.len());
            }
        }
    }

    fn register(&mut self, handle: ClientHandle) {
        let client = handle.id();
        self.clients.insert(client, handle);
        debug!(%client, members = self.clients.len(), "client registered");
    }

    fn remove(&mut self, handle: ClientHandle) {
        let client = handle.id();
        match self.clients.remove(&client) {
            Some(_) => debug!(%client, members = self.clients.len(), "client removed"),
            None => debug!(%client, "leave for unregistered client"),
        }
    }

    fn broadcast(&mut self, message: Message) {
        info!(
            recipients = self.clients.len(),
            origin = ?message.origin(),
            %message,
            "broadcasting"
        );

        let mut closed = Vec::new();
        for (&client, handle) in &self.clients {
            if !message.is_for(client) {
                continue;
            }
            if handle.send(message.text()).is_err() {
                closed.push(client);
            }
        }

        for client in closed {
            self.clients.remove(&client);
            debug!(%client, "evicted client with closed queue");
        }
    }
}
