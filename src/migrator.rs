use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_manufacturing_tables::Migration),
            Box::new(m20240101_000003_create_serial_number_tables::Migration),
            Box::new(m20240101_000004_create_inventory_tables::Migration),
            Box::new(m20240101_000005_create_order_tables::Migration),
            Box::new(m20240101_000006_create_shipment_tables::Migration),
        ]
    }
}

mod m20240101_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductCategories::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductCategories::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(ProductCategories::Name).string().not_null())
                        .col(ColumnDef::new(ProductCategories::Code).string().null())
                        .col(
                            ColumnDef::new(ProductCategories::SerialTemplate)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(ProductCategories::SerialPrefix).string().null())
                        .col(
                            ColumnDef::new(ProductCategories::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductCategories::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Products::Sku).string().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::CategoryId).uuid().null())
                        .col(
                            ColumnDef::new(Products::SerialTracked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
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
                        .name("idx_products_category_id")
                        .table(Products::Table)
                        .col(Products::CategoryId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Recipes::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Recipes::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Recipes::ProductId).uuid().not_null())
                        .col(ColumnDef::new(Recipes::Name).string().not_null())
                        .col(
                            ColumnDef::new(Recipes::OutputQuantity)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Recipes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Recipes::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RecipeComponents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RecipeComponents::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(RecipeComponents::RecipeId).uuid().not_null())
                        .col(
                            ColumnDef::new(RecipeComponents::ComponentProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RecipeComponents::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_recipe_components_recipe_id")
                        .table(RecipeComponents::Table)
                        .col(RecipeComponents::RecipeId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RecipeComponents::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Recipes::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ProductCategories::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ProductCategories {
        Table,
        Id,
        Name,
        Code,
        SerialTemplate,
        SerialPrefix,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Sku,
        Name,
        CategoryId,
        SerialTracked,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Recipes {
        Table,
        Id,
        ProductId,
        Name,
        OutputQuantity,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum RecipeComponents {
        Table,
        Id,
        RecipeId,
        ComponentProductId,
        Quantity,
    }
}

mod m20240101_000002_create_manufacturing_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_manufacturing_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ManufacturingOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ManufacturingOrders::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ManufacturingOrders::RecipeId).uuid().null())
                        .col(
                            ColumnDef::new(ManufacturingOrders::SourceOrderId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::WarehouseId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::PlannedQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::ProducedQuantity)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::Status)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::StartDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::PlannedEndDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::ActualEndDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::EstimatedDurationMinutes)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::ActualDurationMinutes)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::MaterialCost)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::LaborCost)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::OverheadCost)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::TotalCost)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::BatchNumber)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::QualityRating)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(ManufacturingOrders::Notes).text().null())
                        .col(
                            ColumnDef::new(ManufacturingOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingOrders::UpdatedAt)
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
                        .name("idx_manufacturing_orders_status")
                        .table(ManufacturingOrders::Table)
                        .col(ManufacturingOrders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ManufacturingSteps::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ManufacturingSteps::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingSteps::ManufacturingOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingSteps::StepNumber)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingSteps::OperationName)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ManufacturingSteps::Status).string().not_null())
                        .col(
                            ColumnDef::new(ManufacturingSteps::EstimatedDurationMinutes)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingSteps::ActualDurationSecs)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingSteps::AssignedWorkerId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingSteps::StartedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingSteps::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingSteps::QualityCheckPassed)
                                .boolean()
                                .null(),
                        )
                        .col(ColumnDef::new(ManufacturingSteps::QualityNotes).text().null())
                        .col(
                            ColumnDef::new(ManufacturingSteps::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ManufacturingSteps::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_manufacturing_steps_order")
                                .from(
                                    ManufacturingSteps::Table,
                                    ManufacturingSteps::ManufacturingOrderId,
                                )
                                .to(ManufacturingOrders::Table, ManufacturingOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // One row per step number; makes default step creation idempotent
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_manufacturing_steps_order_step")
                        .table(ManufacturingSteps::Table)
                        .col(ManufacturingSteps::ManufacturingOrderId)
                        .col(ManufacturingSteps::StepNumber)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ManufacturingSteps::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ManufacturingOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ManufacturingOrders {
        Table,
        Id,
        OrderNumber,
        ProductId,
        RecipeId,
        SourceOrderId,
        WarehouseId,
        PlannedQuantity,
        ProducedQuantity,
        Status,
        StartDate,
        PlannedEndDate,
        ActualEndDate,
        EstimatedDurationMinutes,
        ActualDurationMinutes,
        MaterialCost,
        LaborCost,
        OverheadCost,
        TotalCost,
        BatchNumber,
        QualityRating,
        Notes,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ManufacturingSteps {
        Table,
        Id,
        ManufacturingOrderId,
        StepNumber,
        OperationName,
        Status,
        EstimatedDurationMinutes,
        ActualDurationSecs,
        AssignedWorkerId,
        StartedAt,
        CompletedAt,
        QualityCheckPassed,
        QualityNotes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_serial_number_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_serial_number_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SerialNumberSettings::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SerialNumberSettings::Id)
                                .integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(SerialNumberSettings::CrossNumbering)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(SerialNumberSettings::GlobalTemplate)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(SerialNumberSettings::GlobalPrefix)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(SerialNumberSettings::CurrentGlobalCounter)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SerialNumberSettings::ResetPolicy)
                                .string()
                                .not_null()
                                .default("never"),
                        )
                        .col(
                            ColumnDef::new(SerialNumberSettings::LastResetDate)
                                .date()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(SerialNumberSettings::Version)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SerialNumberSettings::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SerialNumbers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SerialNumbers::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(SerialNumbers::SerialNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SerialNumbers::ProductId).uuid().not_null())
                        .col(ColumnDef::new(SerialNumbers::CategoryId).uuid().null())
                        .col(
                            ColumnDef::new(SerialNumbers::ManufacturingOrderId)
                                .uuid()
                                .null(),
                        )
                        .col(ColumnDef::new(SerialNumbers::Status).string().not_null())
                        .col(ColumnDef::new(SerialNumbers::WarehouseId).uuid().null())
                        .col(ColumnDef::new(SerialNumbers::OrderId).uuid().null())
                        .col(ColumnDef::new(SerialNumbers::OrderItemId).uuid().null())
                        .col(ColumnDef::new(SerialNumbers::ShipmentItemId).uuid().null())
                        .col(ColumnDef::new(SerialNumbers::InvoiceId).uuid().null())
                        .col(
                            ColumnDef::new(SerialNumbers::ManufacturedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(SerialNumbers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerialNumbers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Serial numbers are globally unique; issuance relies on this index
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_serial_numbers_serial_number")
                        .table(SerialNumbers::Table)
                        .col(SerialNumbers::SerialNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_serial_numbers_category_id")
                        .table(SerialNumbers::Table)
                        .col(SerialNumbers::CategoryId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_serial_numbers_product_id")
                        .table(SerialNumbers::Table)
                        .col(SerialNumbers::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SerialNumbers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SerialNumberSettings::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SerialNumberSettings {
        Table,
        Id,
        CrossNumbering,
        GlobalTemplate,
        GlobalPrefix,
        CurrentGlobalCounter,
        ResetPolicy,
        LastResetDate,
        Version,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum SerialNumbers {
        Table,
        Id,
        SerialNumber,
        ProductId,
        CategoryId,
        ManufacturingOrderId,
        Status,
        WarehouseId,
        OrderId,
        OrderItemId,
        ShipmentItemId,
        InvoiceId,
        ManufacturedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_inventory_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_inventory_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryLevels::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryLevels::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InventoryLevels::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryLevels::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryLevels::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(InventoryLevels::MinStock).integer().null())
                        .col(ColumnDef::new(InventoryLevels::MaxStock).integer().null())
                        .col(
                            ColumnDef::new(InventoryLevels::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryLevels::UpdatedAt)
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
                        .name("idx_inventory_levels_product_warehouse")
                        .table(InventoryLevels::Table)
                        .col(InventoryLevels::ProductId)
                        .col(InventoryLevels::WarehouseId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryMovements::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::Delta).integer().not_null())
                        .col(
                            ColumnDef::new(InventoryMovements::ResultingQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::Reason).string().not_null())
                        .col(
                            ColumnDef::new(InventoryMovements::ReferenceType)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::ReferenceId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryMovements::CreatedAt)
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
                        .name("idx_inventory_movements_product_warehouse")
                        .table(InventoryMovements::Table)
                        .col(InventoryMovements::ProductId)
                        .col(InventoryMovements::WarehouseId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryMovements::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryLevels::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryLevels {
        Table,
        Id,
        ProductId,
        WarehouseId,
        Quantity,
        MinStock,
        MaxStock,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryMovements {
        Table,
        Id,
        ProductId,
        WarehouseId,
        Delta,
        ResultingQuantity,
        Reason,
        ReferenceType,
        ReferenceId,
        CreatedAt,
    }
}

mod m20240101_000005_create_order_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_order_tables"
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
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::WarehouseId).uuid().null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::ShippedQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        Status,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        WarehouseId,
        Quantity,
        ShippedQuantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000006_create_shipment_tables {

    use super::m20240101_000005_create_order_tables::{OrderItems, Orders};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_shipment_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Shipments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Shipments::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Shipments::ShipmentNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Shipments::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Shipments::Status).string().not_null())
                        .col(ColumnDef::new(Shipments::WarehouseId).uuid().null())
                        .col(ColumnDef::new(Shipments::Carrier).string().null())
                        .col(ColumnDef::new(Shipments::TrackingNumber).string().null())
                        .col(ColumnDef::new(Shipments::Notes).text().null())
                        .col(
                            ColumnDef::new(Shipments::ShippedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Shipments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Shipments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_shipments_order")
                                .from(Shipments::Table, Shipments::OrderId)
                                .to(Orders::Table, Orders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ShipmentItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShipmentItems::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(ShipmentItems::ShipmentId).uuid().not_null())
                        .col(ColumnDef::new(ShipmentItems::OrderItemId).uuid().not_null())
                        .col(ColumnDef::new(ShipmentItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(ShipmentItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_shipment_items_shipment")
                                .from(ShipmentItems::Table, ShipmentItems::ShipmentId)
                                .to(Shipments::Table, Shipments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_shipment_items_order_item")
                                .from(ShipmentItems::Table, ShipmentItems::OrderItemId)
                                .to(OrderItems::Table, OrderItems::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipments_order_id")
                        .table(Shipments::Table)
                        .col(Shipments::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShipmentItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Shipments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Shipments {
        Table,
        Id,
        ShipmentNumber,
        OrderId,
        Status,
        WarehouseId,
        Carrier,
        TrackingNumber,
        Notes,
        ShippedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ShipmentItems {
        Table,
        Id,
        ShipmentId,
        OrderItemId,
        Quantity,
        CreatedAt,
    }
}
