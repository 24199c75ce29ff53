use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_products_table::Migration),
            Box::new(m20240301_000002_create_cart_lines_table::Migration),
            Box::new(m20240301_000003_create_checkout_sessions_table::Migration),
            Box::new(m20240301_000004_create_orders_table::Migration),
        ]
    }
}

mod m20240301_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .string_len(64)
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Description).text().null())
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Description,
        Price,
        IsActive,
        UpdatedAt,
    }
}

mod m20240301_000002_create_cart_lines_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_cart_lines_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CartLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CartLines::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(CartLines::CartId).string_len(128).not_null())
                        .col(
                            ColumnDef::new(CartLines::ProductId)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(ColumnDef::new(CartLines::Name).string().not_null())
                        .col(ColumnDef::new(CartLines::Description).text().null())
                        .col(
                            ColumnDef::new(CartLines::UnitPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CartLines::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One line per product per cart
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_lines_cart_product")
                        .table(CartLines::Table)
                        .col(CartLines::CartId)
                        .col(CartLines::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartLines::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum CartLines {
        Table,
        Id,
        CartId,
        ProductId,
        Name,
        Description,
        UnitPrice,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_checkout_sessions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_checkout_sessions_table"
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
                            ColumnDef::new(CheckoutSessions::SessionId)
                                .string_len(255)
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::CartId)
                                .string_len(128)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::LineSnapshot)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::AmountTotalMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::Currency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::RedirectUrl)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::CreatedAt)
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
                        .name("idx_checkout_sessions_cart_id")
                        .table(CheckoutSessions::Table)
                        .col(CheckoutSessions::CartId)
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
    pub(super) enum CheckoutSessions {
        Table,
        SessionId,
        CartId,
        LineSnapshot,
        AmountTotalMinor,
        Currency,
        RedirectUrl,
        CreatedAt,
    }
}

mod m20240301_000004_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Orders::SessionId).string_len(255).not_null())
                        .col(ColumnDef::new(Orders::CartId).string_len(128).null())
                        .col(ColumnDef::new(Orders::CustomerEmail).string().null())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::Items).json().not_null())
                        .col(
                            ColumnDef::new(Orders::NotifiedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // The idempotency key for confirmation
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_session_id")
                        .table(Orders::Table)
                        .col(Orders::SessionId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        SessionId,
        CartId,
        CustomerEmail,
        TotalAmount,
        Currency,
        Status,
        Items,
        NotifiedAt,
        CreatedAt,
    }
}
