use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_users_table::Migration),
            Box::new(m20240601_000002_create_payments_table::Migration),
            Box::new(m20240601_000003_create_orders_table::Migration),
            Box::new(m20240601_000004_create_payment_slips_table::Migration),
        ]
    }
}

mod m20240601_000001_create_users_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_users_table"
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
                        .col(ColumnDef::new(Users::PasswordHash).string().not_null())
                        .col(ColumnDef::new(Users::FirstName).string().not_null())
                        .col(ColumnDef::new(Users::LastName).string().not_null())
                        .col(ColumnDef::new(Users::Phone).string().null())
                        .col(ColumnDef::new(Users::Address).text().null())
                        .col(
                            ColumnDef::new(Users::Role)
                                .string_len(16)
                                .not_null()
                                .default("user"),
                        )
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Users {
        Table,
        Id,
        Email,
        PasswordHash,
        FirstName,
        LastName,
        Phone,
        Address,
        Role,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_payments_table {
    use super::m20240601_000001_create_users_table::Users;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::UserId).uuid().not_null())
                        .col(ColumnDef::new(Payments::OrderNumber).string().not_null())
                        .col(
                            ColumnDef::new(Payments::AmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::Method).string_len(32).not_null())
                        .col(ColumnDef::new(Payments::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Payments::ReferenceCode)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Payments::CustomerName).string().not_null())
                        .col(ColumnDef::new(Payments::CustomerPhone).string().null())
                        .col(ColumnDef::new(Payments::ShippingAddress).text().not_null())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_user_id")
                                .from(Payments::Table, Payments::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_user_id")
                        .table(Payments::Table)
                        .col(Payments::UserId)
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
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Payments {
        Table,
        Id,
        UserId,
        OrderNumber,
        AmountMinor,
        Method,
        Status,
        ReferenceCode,
        CustomerName,
        CustomerPhone,
        ShippingAddress,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_orders_table {
    use super::m20240601_000001_create_users_table::Users;
    use super::m20240601_000002_create_payments_table::Payments;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_orders_table"
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
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(
                            ColumnDef::new(Orders::TotalAmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::ShippingAddress).text().not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentMethod)
                                .string_len(32)
                                .not_null(),
                        )
                        // One order mirrors exactly one payment.
                        .col(
                            ColumnDef::new(Orders::PaymentId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::Items).json().not_null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_payment_id")
                                .from(Orders::Table, Orders::PaymentId)
                                .to(Payments::Table, Payments::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_user_id")
                                .from(Orders::Table, Orders::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
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
    enum Orders {
        Table,
        Id,
        UserId,
        OrderNumber,
        TotalAmountMinor,
        ShippingAddress,
        PaymentMethod,
        PaymentId,
        Items,
        CreatedAt,
    }
}

mod m20240601_000004_create_payment_slips_table {
    use super::m20240601_000001_create_users_table::Users;
    use super::m20240601_000002_create_payments_table::Payments;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_payment_slips_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentSlips::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentSlips::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentSlips::UserId).uuid().not_null())
                        // At most one slip per payment; concurrent uploads race on this index.
                        .col(
                            ColumnDef::new(PaymentSlips::PaymentId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(PaymentSlips::SlipCode)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(PaymentSlips::ReferenceNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSlips::AmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentSlips::FileName).string().not_null())
                        .col(ColumnDef::new(PaymentSlips::FileUrl).string().not_null())
                        .col(
                            ColumnDef::new(PaymentSlips::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentSlips::AdminRemarks).text().null())
                        .col(ColumnDef::new(PaymentSlips::VerifiedBy).uuid().null())
                        .col(
                            ColumnDef::new(PaymentSlips::VerifiedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentSlips::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payment_slips_payment_id")
                                .from(PaymentSlips::Table, PaymentSlips::PaymentId)
                                .to(Payments::Table, Payments::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payment_slips_user_id")
                                .from(PaymentSlips::Table, PaymentSlips::UserId)
                                .to(Users::Table, Users::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_slips_status")
                        .table(PaymentSlips::Table)
                        .col(PaymentSlips::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentSlips::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentSlips {
        Table,
        Id,
        UserId,
        PaymentId,
        SlipCode,
        ReferenceNumber,
        AmountMinor,
        FileName,
        FileUrl,
        Status,
        AdminRemarks,
        VerifiedBy,
        VerifiedAt,
        CreatedAt,
    }
}
