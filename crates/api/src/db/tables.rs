//! Compile-time–checked column identifiers for all tables.

use sea_query::Iden;

#[derive(Iden)]
pub enum Users {
    Table,
    Id,
    ExternalId,
    Email,
    EmailVerified,
    Name,
    Currency,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
pub enum Categories {
    Table,
    Id,
    UserId,
    Name,
    Icon,
    Color,
    IsSystem,
    DefaultLimit,
    Revision,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
pub enum Budgets {
    Table,
    Id,
    UserId,
    Name,
    Month,
    TotalLimit,
    Revision,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
pub enum BudgetCategories {
    Table,
    Id,
    BudgetId,
    CategoryId,
    LimitAmount,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum Transactions {
    Table,
    Id,
    UserId,
    BudgetId,
    CategoryId,
    PaymentMethodId,
    Amount,
    TransactionType,
    IsTransfer,
    TransferToId,
    Description,
    TransactionDate,
    IsRecurring,
    RecurrencePattern,
    Revision,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
pub enum PaymentMethods {
    Table,
    Id,
    UserId,
    Name,
    MethodType,
    LastFour,
    Brand,
    IsDefault,
    IsActive,
    CreditLimit,
    CurrentBalance,
    Revision,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
pub enum Reflections {
    Table,
    Id,
    UserId,
    BudgetId,
    OverallRating,
    IsPrivate,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ReflectionTemplates {
    Table,
    Id,
    Prompt,
    SortOrder,
}

#[derive(Iden)]
pub enum ShareInvitations {
    Table,
    Id,
    BudgetId,
    OwnerId,
    RecipientEmail,
    Permission,
    Status,
    CreatedAt,
    RespondedAt,
    ExpiresAt,
}

#[derive(Iden)]
pub enum ShareAccess {
    Table,
    Id,
    BudgetId,
    OwnerId,
    SharedWithId,
    Permission,
    CreatedAt,
}

#[derive(Iden)]
pub enum SyncOperations {
    Table,
    Id,
    UserId,
    TableName,
    RecordId,
    Operation,
    LocalPayload,
    ServerPayload,
    Status,
    Resolution,
    ErrorMessage,
    CreatedAt,
    ResolvedAt,
}

#[derive(Iden)]
pub enum SyncState {
    Table,
    UserId,
    LastSyncAt,
}
