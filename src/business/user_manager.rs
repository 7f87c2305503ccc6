//! User management on live nodes

use std::sync::Arc;

use super::account::build_protocol_user;
use super::ledger::UserLedger;
use super::node_manager::NodeManager;
use super::params::{UserInfo, UserTraffic};
use crate::core::hooks::{Features, InboundHandler};
use crate::error::{CoreError, EngineError, Result};
use crate::logger::log;
use crate::utils::{format_user_email, Rollback};

/// Adds and removes users on nodes and keeps their traffic counters
pub struct UserManager {
    features: Features,
    nodes: Arc<NodeManager>,
}

impl UserManager {
    pub fn new(features: Features, nodes: Arc<NodeManager>) -> Self {
        Self { features, nodes }
    }

    pub fn ledger(&self) -> &UserLedger {
        self.nodes.ledger()
    }

    /// Live inbound of a node
    fn inbound(&self, node: &str) -> Result<Arc<dyn InboundHandler>> {
        self.features
            .inbounds
            .get_handler(node)
            .map_err(|e| match e {
                EngineError::TagNotFound(_) => CoreError::NodeNotFound(node.to_string()),
                e => CoreError::engine(format!("get inbound {}", node), e),
            })
    }

    /// Add users to a node
    ///
    /// Either every user is added or none is.
    pub fn add_users(&self, node: &str, users: &[UserInfo]) -> Result<()> {
        let info = self
            .nodes
            .node(node)
            .ok_or_else(|| CoreError::NodeNotFound(node.to_string()))?;
        let accounts = users
            .iter()
            .map(|u| build_protocol_user(node, &info.protocol, u))
            .collect::<Result<Vec<_>>>()?;

        let handler = self.inbound(node)?;
        let manager = handler
            .account_manager()
            .ok_or_else(|| CoreError::NotUserManager(node.to_string()))?;

        let mut rollback = Rollback::new(format!("add users to {}", node));
        for account in accounts {
            let email = account.email.clone();
            manager
                .add_user(account)
                .map_err(|e| CoreError::engine(format!("add user {}", email), e))?;
            rollback.push("user", move || {
                manager
                    .remove_user(&email)
                    .map_err(|e| CoreError::engine(format!("remove user {}", email), e))
            });
        }
        rollback.commit();

        if let Some(gate) = self.nodes.limiters().get_limiter(node) {
            gate.add_user_infos(users);
        }
        for user in users {
            self.ledger().register(node, &user.name);
        }
        self.nodes
            .record_users(node, users.iter().map(|u| u.name.as_str()));
        log::users(node, "added", users.len());
        Ok(())
    }

    /// Remove users from a node; the first failure aborts the rest
    pub fn del_users(&self, node: &str, names: &[String]) -> Result<()> {
        let handler = self.inbound(node)?;
        let manager = handler
            .account_manager()
            .ok_or_else(|| CoreError::NotUserManager(node.to_string()))?;
        let gate = self.nodes.limiters().get_limiter(node);

        for name in names {
            let email = format_user_email(name, node);
            manager
                .remove_user(&email)
                .map_err(|e| CoreError::engine(format!("remove user {}", email), e))?;
            self.ledger().remove(node, name);
            self.nodes.forget_users(node, std::slice::from_ref(name));
            if let Some(gate) = &gate {
                gate.del_users(node, std::slice::from_ref(name));
            }
        }
        log::users(node, "removed", names.len());
        Ok(())
    }

    /// Traffic of a user; unknown users read as zero
    pub fn get_user_traffic(&self, node: &str, user: &str) -> UserTraffic {
        self.ledger().traffic(node, user)
    }

    /// Zero a user's traffic counters
    pub fn reset_user_traffic(&self, node: &str, user: &str) -> Result<()> {
        self.ledger().reset(node, user);
        Ok(())
    }
}
