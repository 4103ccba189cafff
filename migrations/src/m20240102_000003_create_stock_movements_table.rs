use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // The append-only ledger. Quantities are stored with the sign of the
        // change kind already applied, so the balance of a (material, workshop)
        // pair is a plain SUM over this table. The origin columns are a weak
        // polymorphic reference to the producing document (the kind selects
        // the table), so they carry no foreign key.
        manager
            .create_table(
                Table::create()
                    .table(StockMovements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockMovements::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::WorkshopId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::MaterialId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::ChangeKind)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::Quantity)
                            .decimal_len(10, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::Note)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(StockMovements::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(StockMovements::OriginKind)
                            .string_len(50)
                            .null(),
                    )
                    .col(ColumnDef::new(StockMovements::OriginId).big_integer().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_movements_workshop")
                            .from(StockMovements::Table, StockMovements::WorkshopId)
                            .to(Workshops::Table, Workshops::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_movements_material")
                            .from(StockMovements::Table, StockMovements::MaterialId)
                            .to(Materials::Table, Materials::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stock_movements_material_workshop")
                    .table(StockMovements::Table)
                    .col(StockMovements::MaterialId)
                    .col(StockMovements::WorkshopId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stock_movements_origin")
                    .table(StockMovements::Table)
                    .col(StockMovements::OriginKind)
                    .col(StockMovements::OriginId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StockMovements::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StockMovements {
    Table,
    Id,
    WorkshopId,
    MaterialId,
    ChangeKind,
    Quantity,
    Note,
    CreatedAt,
    OriginKind,
    OriginId,
}

#[derive(DeriveIden)]
enum Workshops {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Materials {
    Table,
    Id,
}
