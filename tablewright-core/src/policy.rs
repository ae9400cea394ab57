//! Permission policy gating every mutating schema operation.
//!
//! Two presets exist: [`PermissionPolicy::default`] allows everything,
//! including destructive column and index deletion, while
//! [`PermissionPolicy::safe`] denies deletion and treats any operation absent
//! from its allow-list as denied. A policy with auto-migration disabled
//! denies every operation regardless of the allow-list.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kinds of schema mutation the policy can gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// `CREATE TABLE`
    CreateTable,
    /// `ALTER TABLE ... ADD COLUMN`
    CreateColumn,
    /// Column type or nullability change
    UpdateColumn,
    /// `ALTER TABLE ... DROP COLUMN`
    DeleteColumn,
    /// `CREATE INDEX`
    CreateIndex,
    /// `DROP INDEX`
    DeleteIndex,
}

impl OperationKind {
    /// All operation kinds in declaration order.
    pub const ALL: [Self; 6] = [
        Self::CreateTable,
        Self::CreateColumn,
        Self::UpdateColumn,
        Self::DeleteColumn,
        Self::CreateIndex,
        Self::DeleteIndex,
    ];

    /// Permissions a task of this kind needs before it may run.
    ///
    /// Creating a table implicitly creates every column, so it also needs
    /// `CreateColumn`.
    pub fn required_permissions(self) -> &'static [OperationKind] {
        match self {
            Self::CreateTable => &[Self::CreateTable, Self::CreateColumn],
            Self::CreateColumn => &[Self::CreateColumn],
            Self::UpdateColumn => &[Self::UpdateColumn],
            Self::DeleteColumn => &[Self::DeleteColumn],
            Self::CreateIndex => &[Self::CreateIndex],
            Self::DeleteIndex => &[Self::DeleteIndex],
        }
    }

    /// Whether the operation removes structure from the database.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::DeleteColumn | Self::DeleteIndex)
    }

    /// Stable snake_case identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTable => "create_table",
            Self::CreateColumn => "create_column",
            Self::UpdateColumn => "update_column",
            Self::DeleteColumn => "delete_column",
            Self::CreateIndex => "create_index",
            Self::DeleteIndex => "delete_index",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named policy variant controlling how absent operations are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPreset {
    /// Absent operations are allowed
    #[default]
    Default,
    /// Absent operations are denied; deletion is denied
    Safe,
}

/// Per-operation allow-list plus the dry-run flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPolicy {
    preset: PolicyPreset,
    auto_migrate: bool,
    allowed_operations: HashMap<OperationKind, bool>,
    dry_run: bool,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            preset: PolicyPreset::Default,
            auto_migrate: true,
            allowed_operations: OperationKind::ALL.iter().map(|op| (*op, true)).collect(),
            dry_run: false,
        }
    }
}

impl PermissionPolicy {
    /// Production preset: everything except column and index deletion.
    pub fn safe() -> Self {
        Self {
            preset: PolicyPreset::Safe,
            auto_migrate: true,
            allowed_operations: OperationKind::ALL
                .iter()
                .map(|op| (*op, !op.is_destructive()))
                .collect(),
            dry_run: false,
        }
    }

    /// Policy with auto-migration switched off; denies every operation.
    pub fn disabled() -> Self {
        Self {
            auto_migrate: false,
            ..Self::safe()
        }
    }

    /// Builds the preset named by `preset`.
    pub fn from_preset(preset: PolicyPreset) -> Self {
        match preset {
            PolicyPreset::Default => Self::default(),
            PolicyPreset::Safe => Self::safe(),
        }
    }

    /// Sets an explicit allow/deny entry for one operation.
    pub fn with_operation(mut self, operation: OperationKind, allowed: bool) -> Self {
        self.allowed_operations.insert(operation, allowed);
        self
    }

    /// Removes an entry so the preset's absent-operation rule applies.
    pub fn without_entry(mut self, operation: OperationKind) -> Self {
        self.allowed_operations.remove(&operation);
        self
    }

    /// Sets the dry-run flag.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enables or disables auto-migration as a whole.
    pub fn with_auto_migrate(mut self, auto_migrate: bool) -> Self {
        self.auto_migrate = auto_migrate;
        self
    }

    /// Whether a single operation kind is allowed on its own.
    pub fn is_allowed(&self, operation: OperationKind) -> bool {
        if !self.auto_migrate {
            return false;
        }
        match self.allowed_operations.get(&operation) {
            Some(allowed) => *allowed,
            None => self.preset == PolicyPreset::Default,
        }
    }

    /// Whether a task of `operation` may run, including coupled permissions.
    ///
    /// Returns the first missing permission when denied.
    pub fn check(&self, operation: OperationKind) -> Option<OperationKind> {
        operation
            .required_permissions()
            .iter()
            .copied()
            .find(|required| !self.is_allowed(*required))
    }

    /// Whether statements are recorded instead of executed.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Whether auto-migration is enabled.
    pub fn auto_migrate(&self) -> bool {
        self.auto_migrate
    }

    /// The preset this policy was derived from.
    pub fn preset(&self) -> PolicyPreset {
        self.preset
    }
}

/// Serializable policy description used in migration configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Base preset
    pub preset: PolicyPreset,
    /// `false` denies every operation
    pub auto_migrate: bool,
    /// Record statements without executing them
    pub dry_run: bool,
    /// Explicit per-operation entries applied on top of the preset
    pub overrides: HashMap<OperationKind, bool>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            preset: PolicyPreset::Default,
            auto_migrate: true,
            dry_run: false,
            overrides: HashMap::new(),
        }
    }
}

impl PolicyConfig {
    /// Builds the runtime policy.
    pub fn to_policy(&self) -> PermissionPolicy {
        self.overrides.iter().fold(
            PermissionPolicy::from_preset(self.preset)
                .with_auto_migrate(self.auto_migrate)
                .with_dry_run(self.dry_run),
            |policy, (operation, allowed)| policy.with_operation(*operation, *allowed),
        )
    }

    /// Switches to the safe preset and denies destructive operations even
    /// where an override allowed them.
    pub fn enforce_safe(&mut self) {
        self.preset = PolicyPreset::Safe;
        for operation in OperationKind::ALL.into_iter().filter(|op| op.is_destructive()) {
            self.overrides.insert(operation, false);
        }
    }
}
