use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An action a caller may attempt on a platform resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Read-only introspection.
    View,
    /// Creating a new resource.
    Create,
    /// Starting an agent.
    Start,
    /// Stopping an agent.
    Stop,
    /// Deleting a resource.
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::View => write!(f, "view"),
            Action::Create => write!(f, "create"),
            Action::Start => write!(f, "start"),
            Action::Stop => write!(f, "stop"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// The category of resource an [`Action`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Agent records and lifecycle.
    Agent,
    /// Scheduler tasks.
    Task,
    /// Resource allocations.
    Allocation,
    /// Platform-wide operations.
    System,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Agent => write!(f, "agent"),
            ResourceType::Task => write!(f, "task"),
            ResourceType::Allocation => write!(f, "allocation"),
            ResourceType::System => write!(f, "system"),
        }
    }
}

/// A set of allowed actions on one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleGrant {
    /// The resource type this grant covers.
    pub resource: ResourceType,
    /// Allowed actions.
    pub actions: Vec<Action>,
}

/// A named bundle of grants, assignable to users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Role name referenced by assignments.
    pub name: String,
    /// Grants this role carries.
    #[serde(default)]
    pub grants: Vec<RoleGrant>,
}

/// Authorization decision surface consumed by the engine.
///
/// Authentication is out of scope: callers arrive with an already
/// established `user_id`.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// True when `user_id` may perform `action` on the given resource.
    async fn check_access(
        &self,
        user_id: &str,
        resource_id: &str,
        resource_type: ResourceType,
        action: Action,
    ) -> bool;
}

/// Role-based [`AccessControl`] implementation.
///
/// A user is allowed an action when any of their assigned roles carries
/// a grant for the resource type that includes the action. Ownership
/// shortcuts (an agent's owner acting on their own agent) are the
/// engine's concern — it holds the records; this policy is purely
/// role-driven.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RbacPolicy {
    roles: HashMap<String, Role>,
    assignments: HashMap<String, Vec<String>>,
}

impl RbacPolicy {
    /// Creates an empty policy that denies everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a policy from configured roles and user assignments.
    pub fn from_config(roles: Vec<Role>, assignments: HashMap<String, Vec<String>>) -> Self {
        let roles = roles.into_iter().map(|r| (r.name.clone(), r)).collect();
        Self { roles, assignments }
    }

    /// Defines or replaces a role.
    pub fn define_role(&mut self, role: Role) {
        self.roles.insert(role.name.clone(), role);
    }

    /// Assigns a role to a user (idempotent).
    pub fn assign(&mut self, user_id: impl Into<String>, role_name: impl Into<String>) {
        let roles = self.assignments.entry(user_id.into()).or_default();
        let role_name = role_name.into();
        if !roles.contains(&role_name) {
            roles.push(role_name);
        }
    }

    /// Synchronous decision used by [`AccessControl::check_access`].
    pub fn allows(&self, user_id: &str, resource_type: ResourceType, action: Action) -> bool {
        let Some(assigned) = self.assignments.get(user_id) else {
            return false;
        };
        assigned
            .iter()
            .filter_map(|name| self.roles.get(name))
            .flat_map(|role| role.grants.iter())
            .any(|grant| grant.resource == resource_type && grant.actions.contains(&action))
    }
}

#[async_trait]
impl AccessControl for RbacPolicy {
    async fn check_access(
        &self,
        user_id: &str,
        _resource_id: &str,
        resource_type: ResourceType,
        action: Action,
    ) -> bool {
        self.allows(user_id, resource_type, action)
    }
}

/// Permissive policy for development and tests.
pub struct AllowAll;

#[async_trait]
impl AccessControl for AllowAll {
    async fn check_access(
        &self,
        _user_id: &str,
        _resource_id: &str,
        _resource_type: ResourceType,
        _action: Action,
    ) -> bool {
        true
    }
}
