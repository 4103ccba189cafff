use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MaterialCategories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MaterialCategories::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MaterialCategories::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaterialCategories::SortOrder)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Materials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Materials::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Materials::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Materials::ManufacturerName)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Materials::OrderNumber)
                            .string_len(100)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Materials::CategoryId).big_integer().null())
                    .col(
                        ColumnDef::new(Materials::Deprecated)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_materials_category")
                            .from(Materials::Table, Materials::CategoryId)
                            .to(MaterialCategories::Table, MaterialCategories::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Symmetric alternatives stored once per pair, canonically ordered
        // (material_a_id < material_b_id).
        manager
            .create_table(
                Table::create()
                    .table(MaterialAlternatives::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MaterialAlternatives::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MaterialAlternatives::MaterialAId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaterialAlternatives::MaterialBId)
                            .big_integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_material_alternatives_a")
                            .from(MaterialAlternatives::Table, MaterialAlternatives::MaterialAId)
                            .to(Materials::Table, Materials::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_material_alternatives_b")
                            .from(MaterialAlternatives::Table, MaterialAlternatives::MaterialBId)
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
                    .name("idx_material_alternatives_pair")
                    .table(MaterialAlternatives::Table)
                    .col(MaterialAlternatives::MaterialAId)
                    .col(MaterialAlternatives::MaterialBId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MaterialAlternatives::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Materials::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MaterialCategories::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MaterialCategories {
    Table,
    Id,
    Name,
    SortOrder,
}

#[derive(DeriveIden)]
enum Materials {
    Table,
    Id,
    Name,
    ManufacturerName,
    OrderNumber,
    CategoryId,
    Deprecated,
}

#[derive(DeriveIden)]
enum MaterialAlternatives {
    Table,
    Id,
    MaterialAId,
    MaterialBId,
}
