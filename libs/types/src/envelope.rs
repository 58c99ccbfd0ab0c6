//! Envelope head and envelope
//!
//! The head carries everything routing needs; the method name and argument
//! list are opaque to every layer except the destination actor's dispatch
//! table. Envelopes are values: they are cloned across task boundaries and
//! never shared mutably.

use serde::{Deserialize, Serialize};

use crate::arg::Arg;
use crate::service::{SendMode, ServiceType};
use crate::{ClusterId, EntityId, SocketId, TypeError};

const ROUTE_SEPARATOR: &str = "<-";

/// Routing metadata for one message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvelopeHead {
    /// Destination actor name.
    pub actor_name: String,
    /// Destination service type; `None` means the local process.
    pub service: Option<ServiceType>,
    /// Destination cluster id; 0 lets the router pick one.
    pub cluster_id: ClusterId,
    /// Origin cluster id, used as the reply destination.
    pub src_cluster_id: ClusterId,
    /// Origin socket id (client session on a gate).
    pub socket_id: SocketId,
    /// Reply subject; empty means fire-and-forget.
    pub reply: String,
    pub send_mode: SendMode,
    /// Routing key: entity id for virtual actors, shard key for pools.
    pub id: EntityId,
}

impl EnvelopeHead {
    /// Head addressed to a local actor by name.
    pub fn to_actor(name: impl Into<String>) -> Self {
        Self {
            actor_name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service: ServiceType) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    pub fn with_cluster(mut self, cluster_id: ClusterId) -> Self {
        self.cluster_id = cluster_id;
        self
    }

    pub fn with_socket(mut self, socket_id: SocketId) -> Self {
        self.socket_id = socket_id;
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.send_mode = SendMode::Broadcast;
        self
    }

    pub fn topic(mut self) -> Self {
        self.send_mode = SendMode::Topic;
        self
    }

    /// True when the sender is waiting on a reply subject.
    pub fn is_call(&self) -> bool {
        !self.reply.is_empty()
    }

    /// Apply the `service<-Actor.Method` shorthand and return the bare method.
    ///
    /// `Actor.Method` only sets the actor name, and a plain `Method` leaves the
    /// head untouched.
    pub fn route(&mut self, target: &str) -> Result<String, TypeError> {
        let rest = match target.split_once(ROUTE_SEPARATOR) {
            Some((service, rest)) => {
                self.service = Some(service.parse()?);
                rest
            }
            None => target,
        };

        match rest.rsplit_once('.') {
            Some((actor, method)) if !actor.is_empty() && !method.is_empty() => {
                self.actor_name = actor.to_string();
                Ok(method.to_string())
            }
            Some(_) => Err(TypeError::InvalidRoute {
                route: target.to_string(),
            }),
            None if rest.is_empty() => Err(TypeError::InvalidRoute {
                route: target.to_string(),
            }),
            None => Ok(rest.to_string()),
        }
    }
}

/// A routed method invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    pub head: EnvelopeHead,
    pub method: String,
    pub args: Vec<Arg>,
}

impl Envelope {
    pub fn new(head: EnvelopeHead, method: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            head,
            method: method.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_full_shorthand() {
        let mut head = EnvelopeHead::default();
        let method = head.route("game<-PlayerMgr.Login").unwrap();
        assert_eq!(method, "Login");
        assert_eq!(head.actor_name, "PlayerMgr");
        assert_eq!(head.service, Some(ServiceType::Game));
    }

    #[test]
    fn test_route_actor_only() {
        let mut head = EnvelopeHead::default().with_service(ServiceType::Db);
        let method = head.route("Store.Save").unwrap();
        assert_eq!(method, "Save");
        assert_eq!(head.actor_name, "Store");
        assert_eq!(head.service, Some(ServiceType::Db));
    }

    #[test]
    fn test_route_plain_method_leaves_head() {
        let mut head = EnvelopeHead::to_actor("Chat");
        assert_eq!(head.route("Say").unwrap(), "Say");
        assert_eq!(head.actor_name, "Chat");
    }

    #[test]
    fn test_route_rejects_malformed() {
        let mut head = EnvelopeHead::default();
        assert!(head.route("lobby<-A.B").is_err());
        assert!(head.route("A.").is_err());
        assert!(head.route("").is_err());
    }

    #[test]
    fn test_builders() {
        let head = EnvelopeHead::to_actor("Room")
            .with_service(ServiceType::Game)
            .with_id(9)
            .broadcast();
        assert_eq!(head.send_mode, SendMode::Broadcast);
        assert_eq!(head.id, 9);
        assert!(!head.is_call());
    }
}
