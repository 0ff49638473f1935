//! Subcommand implementations

pub mod forecast;
pub mod inspect;
pub mod sample;

use forecast_lib::ColumnHints;

/// Column hint flags shared by commands that read uploads
#[derive(clap::Args, Debug, Clone, Default)]
pub struct HintArgs {
    /// Header of the date column (inferred if omitted)
    #[arg(long)]
    pub date_column: Option<String>,

    /// Header of the item column (inferred if omitted)
    #[arg(long)]
    pub item_column: Option<String>,

    /// Header of the quantity column (inferred if omitted)
    #[arg(long)]
    pub quantity_column: Option<String>,
}

impl From<HintArgs> for ColumnHints {
    fn from(args: HintArgs) -> Self {
        ColumnHints {
            date: args.date_column,
            item: args.item_column,
            quantity: args.quantity_column,
        }
    }
}
