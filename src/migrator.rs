use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_accounts_tables::Migration),
            Box::new(m20240301_000002_create_catalog_tables::Migration),
            Box::new(m20240301_000003_create_accounting_tables::Migration),
            Box::new(m20240301_000004_create_checkout_sessions_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_accounts_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_accounts_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Users::Email)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Users::IsStaff)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Users::IsSalesRep)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Users::MadeAnOrder)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Users::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Users::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Mailboxes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Mailboxes::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Mailboxes::Email)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Mailboxes::UserId).uuid().null())
                        .col(ColumnDef::new(Mailboxes::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_mailboxes_user_id")
                        .table(Mailboxes::Table)
                        .col(Mailboxes::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Mailboxes::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Users {
        Table,
        Id,
        Email,
        IsStaff,
        IsSalesRep,
        MadeAnOrder,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Mailboxes {
        Table,
        Id,
        Email,
        UserId,
        CreatedAt,
    }
}

mod m20240301_000002_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Sites::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Sites::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Sites::Name).string().not_null())
                        .col(ColumnDef::new(Sites::Price).decimal().not_null())
                        .col(ColumnDef::new(Sites::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Sites::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SocialProfiles::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SocialProfiles::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SocialProfiles::UserId).uuid().not_null())
                        .col(ColumnDef::new(SocialProfiles::SiteId).uuid().not_null())
                        .col(ColumnDef::new(SocialProfiles::Username).string().not_null())
                        .col(ColumnDef::new(SocialProfiles::MailboxId).uuid().not_null())
                        .col(ColumnDef::new(SocialProfiles::Status).string().not_null())
                        .col(ColumnDef::new(SocialProfiles::Profile).json().null())
                        .col(
                            ColumnDef::new(SocialProfiles::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SocialProfiles::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_social_profiles_status")
                        .table(SocialProfiles::Table)
                        .col(SocialProfiles::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ReputationCases::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReputationCases::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReputationCases::UserId).uuid().not_null())
                        .col(ColumnDef::new(ReputationCases::Title).string().not_null())
                        .col(ColumnDef::new(ReputationCases::Price).decimal().not_null())
                        .col(ColumnDef::new(ReputationCases::Status).string().not_null())
                        .col(
                            ColumnDef::new(ReputationCases::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReputationCases::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReputationCases::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SocialProfiles::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Sites::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Sites {
        Table,
        Id,
        Name,
        Price,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum SocialProfiles {
        Table,
        Id,
        UserId,
        SiteId,
        Username,
        MailboxId,
        Status,
        Profile,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ReputationCases {
        Table,
        Id,
        UserId,
        Title,
        Price,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_accounting_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_accounting_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentMethods::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentMethods::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentMethods::Name).string().not_null())
                        .col(ColumnDef::new(PaymentMethods::Variant).string().not_null())
                        .col(
                            ColumnDef::new(PaymentMethods::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentMethods::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(DiscountCodes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DiscountCodes::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DiscountCodes::SalesRepId).uuid().not_null())
                        .col(
                            ColumnDef::new(DiscountCodes::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::Discount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::Commission)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DiscountCodes::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ServiceKind).string().not_null())
                        .col(ColumnDef::new(Orders::Items).json().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethodId).uuid().not_null())
                        .col(ColumnDef::new(Orders::DiscountCodeId).uuid().null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::Token).string().not_null())
                        .col(ColumnDef::new(Payments::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Payments::Total).decimal().not_null())
                        .col(ColumnDef::new(Payments::Currency).string().not_null())
                        .col(ColumnDef::new(Payments::Status).string().not_null())
                        .col(ColumnDef::new(Payments::Variant).string().not_null())
                        .col(ColumnDef::new(Payments::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Payments::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            // One payment per order, enforced by storage as the final backstop.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uidx_payments_order_id")
                        .table(Payments::Table)
                        .col(Payments::OrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_token")
                        .table(Payments::Table)
                        .col(Payments::Token)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_status")
                        .table(Payments::Table)
                        .col(Payments::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(DiscountCodes::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PaymentMethods::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentMethods {
        Table,
        Id,
        Name,
        Variant,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum DiscountCodes {
        Table,
        Id,
        SalesRepId,
        Code,
        Discount,
        Commission,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        UserId,
        ServiceKind,
        Items,
        PaymentMethodId,
        DiscountCodeId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        Token,
        OrderId,
        Total,
        Currency,
        Status,
        Variant,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_checkout_sessions_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_checkout_sessions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CheckoutSessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CheckoutSessions::Id)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutSessions::Cart).json().not_null())
                        .col(
                            ColumnDef::new(CheckoutSessions::ProfileDetails)
                                .json()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::IsBlocked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(CheckoutSessions::PaymentUrl).string().null())
                        .col(
                            ColumnDef::new(CheckoutSessions::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CheckoutSessions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CheckoutSessions {
        Table,
        Id,
        Cart,
        ProfileDetails,
        IsBlocked,
        PaymentUrl,
        CreatedAt,
        UpdatedAt,
    }
}
