use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_checkout_tables::Migration),
            Box::new(m20240601_000002_create_provider_account_tables::Migration),
            Box::new(m20240601_000003_create_attempt_and_event_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_checkout_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_checkout_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentIntents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentIntents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::OrgId).string().not_null())
                        .col(
                            ColumnDef::new(PaymentIntents::AmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::Currency).string().not_null())
                        .col(ColumnDef::new(PaymentIntents::Description).string().null())
                        .col(ColumnDef::new(PaymentIntents::OrderId).string().null())
                        .col(
                            ColumnDef::new(PaymentIntents::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentIntents::ClientSecret)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::ReturnUrl).string().null())
                        .col(ColumnDef::new(PaymentIntents::Metadata).json().not_null())
                        .col(
                            ColumnDef::new(PaymentIntents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentIntents::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Customers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Customers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Customers::OrgId).string().not_null())
                        .col(ColumnDef::new(Customers::Email).string().null())
                        .col(ColumnDef::new(Customers::Phone).string().null())
                        .col(ColumnDef::new(Customers::CustomerUserRef).string().null())
                        .col(ColumnDef::new(Customers::Metadata).json().not_null())
                        .col(
                            ColumnDef::new(Customers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CheckoutSessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CheckoutSessions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutSessions::OrgId).string().not_null())
                        .col(
                            ColumnDef::new(CheckoutSessions::PublicToken)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::PaymentIntentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutSessions::CustomerId).uuid().null())
                        .col(
                            ColumnDef::new(CheckoutSessions::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::SelectedProviderId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::SelectedAttemptId)
                                .uuid()
                                .null(),
                        )
                        .col(ColumnDef::new(CheckoutSessions::SuccessUrl).string().null())
                        .col(ColumnDef::new(CheckoutSessions::CancelUrl).string().null())
                        .col(ColumnDef::new(CheckoutSessions::ReturnUrl).string().null())
                        .col(ColumnDef::new(CheckoutSessions::Metadata).json().not_null())
                        .col(
                            ColumnDef::new(CheckoutSessions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_checkout_sessions_payment_intent")
                                .from(CheckoutSessions::Table, CheckoutSessions::PaymentIntentId)
                                .to(PaymentIntents::Table, PaymentIntents::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_checkout_sessions_public_token")
                        .table(CheckoutSessions::Table)
                        .col(CheckoutSessions::PublicToken)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_checkout_sessions_payment_intent_id")
                        .table(CheckoutSessions::Table)
                        .col(CheckoutSessions::PaymentIntentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CheckoutSessions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Customers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PaymentIntents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum PaymentIntents {
        Table,
        Id,
        OrgId,
        AmountMinor,
        Currency,
        Description,
        OrderId,
        Status,
        ClientSecret,
        ReturnUrl,
        Metadata,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Customers {
        Table,
        Id,
        OrgId,
        Email,
        Phone,
        CustomerUserRef,
        Metadata,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum CheckoutSessions {
        Table,
        Id,
        OrgId,
        PublicToken,
        PaymentIntentId,
        CustomerId,
        Status,
        SelectedProviderId,
        SelectedAttemptId,
        SuccessUrl,
        CancelUrl,
        ReturnUrl,
        Metadata,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_provider_account_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_provider_account_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrgProviderAccounts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrgProviderAccounts::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrgProviderAccounts::OrgId).string().not_null())
                        .col(
                            ColumnDef::new(OrgProviderAccounts::ProviderId)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrgProviderAccounts::Environment)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrgProviderAccounts::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrgProviderAccounts::DisplayLabel)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(OrgProviderAccounts::Metadata).json().not_null())
                        .col(
                            ColumnDef::new(OrgProviderAccounts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrgProviderAccounts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_org_provider_accounts_lookup")
                        .table(OrgProviderAccounts::Table)
                        .col(OrgProviderAccounts::OrgId)
                        .col(OrgProviderAccounts::ProviderId)
                        .col(OrgProviderAccounts::Environment)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrgProviderAccountSecrets::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrgProviderAccountSecrets::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrgProviderAccountSecrets::OrgProviderAccountId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(OrgProviderAccountSecrets::Credentials)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrgProviderAccountSecrets::RotationVersion)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(OrgProviderAccountSecrets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_org_provider_account_secrets_account")
                                .from(
                                    OrgProviderAccountSecrets::Table,
                                    OrgProviderAccountSecrets::OrgProviderAccountId,
                                )
                                .to(OrgProviderAccounts::Table, OrgProviderAccounts::Id),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(OrgProviderAccountSecrets::Table)
                        .to_owned(),
                )
                .await?;
            manager
                .drop_table(Table::drop().table(OrgProviderAccounts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum OrgProviderAccounts {
        Table,
        Id,
        OrgId,
        ProviderId,
        Environment,
        Status,
        DisplayLabel,
        Metadata,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrgProviderAccountSecrets {
        Table,
        Id,
        OrgProviderAccountId,
        Credentials,
        RotationVersion,
        CreatedAt,
    }
}

mod m20240601_000003_create_attempt_and_event_tables {
    use super::m20240601_000001_create_checkout_tables::PaymentIntents;
    use super::m20240601_000002_create_provider_account_tables::OrgProviderAccounts;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_attempt_and_event_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentAttempts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentAttempts::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::PaymentIntentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::ProviderId).string().not_null())
                        .col(
                            ColumnDef::new(PaymentAttempts::OrgProviderAccountId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::ProviderPaymentId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::CheckoutUrl).string().null())
                        .col(
                            ColumnDef::new(PaymentAttempts::RawInitResponse)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payment_attempts_payment_intent")
                                .from(PaymentAttempts::Table, PaymentAttempts::PaymentIntentId)
                                .to(PaymentIntents::Table, PaymentIntents::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payment_attempts_account")
                                .from(PaymentAttempts::Table, PaymentAttempts::OrgProviderAccountId)
                                .to(OrgProviderAccounts::Table, OrgProviderAccounts::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // Lookup path for webhooks; deliberately not unique.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_attempts_provider_payment")
                        .table(PaymentAttempts::Table)
                        .col(PaymentAttempts::ProviderId)
                        .col(PaymentAttempts::ProviderPaymentId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PaymentEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentEvents::ProviderId).string().not_null())
                        .col(
                            ColumnDef::new(PaymentEvents::Environment)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentEvents::OrgId).string().null())
                        .col(ColumnDef::new(PaymentEvents::ProviderEventId).string().null())
                        .col(
                            ColumnDef::new(PaymentEvents::ProviderPaymentId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(PaymentEvents::EventType).string().not_null())
                        .col(ColumnDef::new(PaymentEvents::Payload).json().not_null())
                        .col(
                            ColumnDef::new(PaymentEvents::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentEvents::ProcessedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(PaymentEvents::ProcessingError).text().null())
                        .to_owned(),
                )
                .await?;

            // Advisory only: duplicate deliveries are expected to produce duplicate rows.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_events_provider_event")
                        .table(PaymentEvents::Table)
                        .col(PaymentEvents::ProviderId)
                        .col(PaymentEvents::ProviderEventId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentEvents::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PaymentAttempts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentAttempts {
        Table,
        Id,
        PaymentIntentId,
        ProviderId,
        OrgProviderAccountId,
        Status,
        ProviderPaymentId,
        CheckoutUrl,
        RawInitResponse,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PaymentEvents {
        Table,
        Id,
        ProviderId,
        Environment,
        OrgId,
        ProviderEventId,
        ProviderPaymentId,
        EventType,
        Payload,
        ReceivedAt,
        ProcessedAt,
        ProcessingError,
    }
}
