//! Shared API types, business rules, and SQL builders for budgetsync.
//!
//! This crate is the **single source of truth** for every request/response
//! body the server speaks. JSON field names are camelCase; enum values are
//! lowercase strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "backend")]
pub mod db;
pub mod records;
pub mod service;

// ─── Shared Enums ────────────────────────────────────────────────────────────

/// Effective access level of a user on a budget.
///
/// Variants are declared lowest first so the derived `Ord` is the access
/// order: `None < View < Edit < Owner`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    None,
    View,
    Edit,
    Owner,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::View => "view",
            Self::Edit => "edit",
            Self::Owner => "owner",
        }
    }

    /// Parse a level that can be granted through sharing (`view` or `edit`).
    pub fn parse_grant(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Self::View),
            "edit" => Some(Self::Edit),
            _ => None,
        }
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a budget share invitation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tables that take part in offline sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Categories,
    Budgets,
    Transactions,
    PaymentMethods,
}

impl SyncTable {
    pub const ALL: [SyncTable; 4] = [
        Self::Categories,
        Self::Budgets,
        Self::Transactions,
        Self::PaymentMethods,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Budgets => "budgets",
            Self::Transactions => "transactions",
            Self::PaymentMethods => "payment_methods",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for SyncTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of client-side mutation carried by a push.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperationKind {
    Create,
    Update,
    Delete,
}

impl SyncOperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncOperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a persisted sync operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Applied,
    Conflict,
    Resolved,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Conflict => "conflict",
            Self::Resolved => "resolved",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "applied" => Some(Self::Applied),
            "conflict" => Some(Self::Conflict),
            "resolved" => Some(Self::Resolved),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether a resolution may still be attempted from this status.
    pub fn is_resolvable(&self) -> bool {
        matches!(self, Self::Conflict | Self::Error)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-operation outcome reported by a push.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Success,
    Conflict,
    Error,
}

/// How a recorded conflict should be settled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Local,
    Server,
    Merge,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Server => "server",
            Self::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "server" => Some(Self::Server),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Expense,
    Income,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
            Self::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "expense" => Some(Self::Expense),
            "income" => Some(Self::Income),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    Cash,
    Debit,
    Credit,
    Ewallet,
    Bank,
    Other,
}

impl PaymentMethodType {
    pub const NAMES: &'static [&'static str] =
        &["cash", "debit", "credit", "ewallet", "bank", "other"];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Cash => "cash",
            Self::Debit => "debit",
            Self::Credit => "credit",
            Self::Ewallet => "ewallet",
            Self::Bank => "bank",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(Self::Cash),
            "debit" => Some(Self::Debit),
            "credit" => Some(Self::Credit),
            "ewallet" => Some(Self::Ewallet),
            "bank" => Some(Self::Bank),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

// ─── Envelope ────────────────────────────────────────────────────────────────

/// Success envelope: `{ "success": true, "data": ... }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Error envelope: `{ "success": false, "error": { "message", "code" } }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub code: String,
}

/// Generic body for operations that don't return a record.
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub currency: String,
    pub created_at: String,
    pub updated_at: String,
    /// False when the email was self-declared at onboarding. Such users
    /// cannot see or answer invitations.
    pub email_verified: bool,
}

/// Body of `POST /api/auth/onboarding`. `email` is only used when the
/// identity token carries none, and is then stored unverified.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequest {
    pub name: Option<String>,
    pub currency: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub currency: Option<String>,
}

// ─── Categories ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub icon: Option<String>,
    pub color: String,
    pub is_system: bool,
    pub default_limit: Option<f64>,
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryRequest {
    /// Client-chosen id, so offline-created rows keep their identity.
    pub id: Option<String>,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub default_limit: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub default_limit: Option<f64>,
}

// ─── Budgets ─────────────────────────────────────────────────────────────────

/// A budget together with its spending totals and the caller's access level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub id: String,
    pub user_id: String,
    pub name: Option<String>,
    /// First day of the month, `YYYY-MM-01`.
    pub month: String,
    pub total_limit: f64,
    pub spent: f64,
    pub remaining: f64,
    pub permission: PermissionLevel,
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBudgetRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub month: String,
    pub total_limit: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBudgetRequest {
    pub name: Option<String>,
    pub total_limit: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetCategory {
    pub id: String,
    pub budget_id: String,
    pub category_id: String,
    pub category_name: String,
    pub color: String,
    pub limit_amount: f64,
    pub spent: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBudgetCategoryRequest {
    pub category_id: String,
    pub limit_amount: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBudgetCategoryRequest {
    pub limit_amount: f64,
}

// ─── Transactions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub budget_id: Option<String>,
    pub category_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub amount: f64,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub is_transfer: bool,
    pub transfer_to_id: Option<String>,
    pub description: Option<String>,
    pub transaction_date: String,
    pub is_recurring: bool,
    pub recurrence_pattern: Option<serde_json::Value>,
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub id: Option<String>,
    pub budget_id: Option<String>,
    pub category_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub amount: f64,
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub transfer_to_id: Option<String>,
    pub description: Option<String>,
    pub transaction_date: String,
    #[serde(default)]
    pub is_recurring: bool,
    pub recurrence_pattern: Option<serde_json::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTransactionRequest {
    pub category_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub amount: Option<f64>,
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub description: Option<String>,
    pub transaction_date: Option<String>,
    pub is_recurring: Option<bool>,
    pub recurrence_pattern: Option<serde_json::Value>,
}

/// Query parameters for `GET /api/transactions`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionListQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category: Option<String>,
    pub budget: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionListResponse {
    pub transactions: Vec<Transaction>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

// ─── Payment methods ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub method_type: PaymentMethodType,
    pub last_four: Option<String>,
    pub brand: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub credit_limit: Option<f64>,
    pub current_balance: Option<f64>,
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentMethodRequest {
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub last_four: Option<String>,
    pub brand: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    pub credit_limit: Option<f64>,
    pub current_balance: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentMethodRequest {
    pub name: Option<String>,
    pub last_four: Option<String>,
    pub brand: Option<String>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
    pub credit_limit: Option<f64>,
    pub current_balance: Option<f64>,
}

// ─── Reflections ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    pub id: String,
    pub user_id: String,
    pub budget_id: String,
    pub overall_rating: Option<i64>,
    pub is_private: bool,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReflectionRequest {
    pub budget_id: String,
    pub overall_rating: Option<i64>,
    #[serde(default)]
    pub is_private: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReflectionRequest {
    pub overall_rating: Option<i64>,
    pub is_private: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionTemplate {
    pub id: String,
    pub prompt: String,
}

// ─── Sharing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub budget_id: String,
    pub owner_id: String,
    pub recipient_email: String,
    pub permission: PermissionLevel,
    pub status: InvitationStatus,
    pub created_at: String,
    pub responded_at: Option<String>,
    pub expires_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationRequest {
    pub budget_id: String,
    pub recipient_email: String,
    pub permission: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondInvitationRequest {
    pub status: String,
}

/// An access grant on a budget, with the collaborator's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareAccess {
    pub id: String,
    pub budget_id: String,
    pub owner_id: String,
    pub shared_with_id: String,
    pub permission: PermissionLevel,
    pub created_at: String,
    pub email: String,
    pub name: String,
}

/// A budget someone else shared with the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedBudget {
    pub access_id: String,
    pub budget_id: String,
    pub budget_name: Option<String>,
    pub month: String,
    pub total_limit: f64,
    pub permission: PermissionLevel,
    pub owner_id: String,
    pub owner_name: String,
    pub shared_at: String,
}

// ─── Sync ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPushRequest {
    #[serde(default)]
    pub operations: Vec<SyncOperationInput>,
}

/// One client-side mutation. `table` and `operation` stay strings so an
/// unknown value yields a per-operation error instead of failing the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationInput {
    pub table: String,
    pub record_id: String,
    pub operation: String,
    #[serde(default)]
    pub local_data: serde_json::Value,
    #[serde(default)]
    pub server_data: Option<serde_json::Value>,
    #[serde(default)]
    pub base_revision: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationResult {
    pub table: String,
    pub record_id: String,
    pub operation: String,
    pub status: PushOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPushResponse {
    pub results: Vec<SyncOperationResult>,
    pub synced_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPullRequest {
    pub last_sync_time: Option<String>,
}

/// Changed records keyed by table name. Every syncable table is present.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPullResponse {
    pub has_more: bool,
    pub last_sync_time: String,
    pub changes: BTreeMap<String, Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    pub pending_operations: i64,
    pub conflicts: i64,
    pub last_sync_time: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    pub operation_id: String,
    pub resolution: String,
    #[serde(default)]
    pub merged_data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictResponse {
    pub operation_id: String,
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A persisted sync operation as listed by `GET /api/sync/operations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationRecord {
    pub id: String,
    pub table: String,
    pub record_id: String,
    pub operation: String,
    pub local_data: serde_json::Value,
    pub server_data: Option<serde_json::Value>,
    pub status: SyncStatus,
    pub resolution: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCleanupRequest {
    pub older_than_days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCleanupResponse {
    pub deleted: i64,
}

// ─── Analytics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySpending {
    pub category_id: Option<String>,
    pub category_name: String,
    pub color: String,
    pub spent: f64,
    pub limit: Option<f64>,
    /// Share of the month's total spending, 0..=100.
    pub percentage: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub month: String,
    pub budget: Option<Budget>,
    pub total_income: f64,
    pub total_expenses: f64,
    pub net: f64,
    pub transaction_count: i64,
    pub top_categories: Vec<CategorySpending>,
    pub recent_transactions: Vec<Transaction>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingResponse {
    pub month: String,
    pub total: f64,
    pub categories: Vec<CategorySpending>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    /// `YYYY-MM`
    pub month: String,
    pub income: f64,
    pub expenses: f64,
    pub net: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsResponse {
    pub months: Vec<TrendPoint>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsQuery {
    pub months: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    pub category_id: String,
    pub category_name: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub total: f64,
    pub transaction_count: i64,
    pub average: f64,
}

// ─── Service Error ───────────────────────────────────────────────────────────

/// Framework-agnostic service error.
///
/// Each variant maps to an HTTP status code and a stable `code` string used
/// in the error envelope.
#[derive(Debug)]
pub enum ServiceError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
    Unavailable(String),
}

impl ServiceError {
    /// HTTP status code as a `u16`.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
            Self::Unavailable(_) => 503,
        }
    }

    /// Machine-readable error code for the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
            Self::Unavailable(_) => "service_unavailable",
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Internal(m)
            | Self::Unavailable(m) => m,
        }
    }

    /// Build a closure that wraps a DB/IO error into `Internal`.
    pub fn from_db<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> Self + '_ {
        move |e| Self::Internal(format!("{context}: {e}"))
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ServiceError {}

impl From<&ServiceError> for ApiError {
    fn from(e: &ServiceError) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                message: e.message().to_string(),
                code: e.code().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_levels_are_ordered() {
        assert!(PermissionLevel::Owner > PermissionLevel::Edit);
        assert!(PermissionLevel::Edit > PermissionLevel::View);
        assert!(PermissionLevel::View > PermissionLevel::None);
    }

    #[test]
    fn only_view_and_edit_can_be_granted() {
        assert_eq!(PermissionLevel::parse_grant("view"), Some(PermissionLevel::View));
        assert_eq!(PermissionLevel::parse_grant("edit"), Some(PermissionLevel::Edit));
        assert_eq!(PermissionLevel::parse_grant("owner"), None);
        assert_eq!(PermissionLevel::parse_grant("EDIT"), None);
    }

    #[test]
    fn sync_table_names_round_trip() {
        for table in SyncTable::ALL {
            assert_eq!(SyncTable::parse(table.as_str()), Some(table));
        }
        assert_eq!(SyncTable::parse("users"), None);
    }

    #[test]
    fn error_envelope_carries_code() {
        let err = ServiceError::Conflict("invitation has expired".into());
        let body = serde_json::to_value(ApiError::from(&err)).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "conflict");
        assert_eq!(body["error"]["message"], "invitation has expired");
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn transaction_type_serializes_as_type() {
        let json = serde_json::json!({
            "amount": 12.5,
            "type": "income",
            "transactionDate": "2025-01-15"
        });
        let req: CreateTransactionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.transaction_type.as_deref(), Some("income"));
        assert!(!req.is_recurring);
    }
}
