use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use production_fulfillment::{
    config::{self, AppConfig},
    db,
    events::process_events,
    services::{
        manufacturing::CreateManufacturingOrder,
        manufacturing_steps::StepCompletion,
        shipments::{LineAllocation, ShipmentMeta},
    },
    AppState,
};
use serde::Serialize;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);

    if let Commands::Migrate = cli.command {
        return run_migrate(&config).await;
    }

    let (state, event_rx) = AppState::initialize(config)
        .await
        .context("failed to initialize fulfillment services")?;
    let events = tokio::spawn(process_events(event_rx));

    let outcome = match cli.command {
        Commands::Migrate => Ok(()),
        Commands::Mo(command) => handle_mo_command(&state, command, cli.json).await,
        Commands::Step(command) => handle_step_command(&state, command, cli.json).await,
        Commands::Serials(command) => handle_serials_command(&state, command, cli.json).await,
        Commands::Inventory(command) => handle_inventory_command(&state, command, cli.json).await,
        Commands::Ship(args) => handle_ship(&state, args, cli.json).await,
    };

    // Close the channel so the event loop drains and exits.
    drop(state);
    let _ = events.await;

    outcome
}

#[derive(Parser)]
#[command(
    name = "fulfillment-cli",
    about = "Operate manufacturing orders, serial numbers, inventory and shipments",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending database migrations
    Migrate,
    /// Manufacturing orders
    #[command(subcommand)]
    Mo(MoCommands),
    /// Manufacturing steps
    #[command(subcommand)]
    Step(StepCommands),
    #[command(subcommand)]
    Serials(SerialCommands),
    #[command(subcommand)]
    Inventory(InventoryCommands),
    /// Ship part of an order line
    Ship(ShipArgs),
}

#[derive(Subcommand)]
enum MoCommands {
    Create(CreateMoArgs),
    /// Open manufacturing orders for a confirmed sales order
    FromOrder(FromOrderArgs),
    Start(MoIdArgs),
    Pause(MoIdArgs),
    Complete(CompleteMoArgs),
    Cancel(MoIdArgs),
    /// Show the production-task view of an order
    Task(MoIdArgs),
}

#[derive(Args)]
struct MoIdArgs {
    #[arg(value_parser = clap::value_parser!(Uuid), help = "Manufacturing order identifier")]
    id: Uuid,
}

#[derive(Args)]
struct CreateMoArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    product: Uuid,
    #[arg(long, help = "Planned quantity")]
    quantity: i32,
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    warehouse: Option<Uuid>,
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    recipe: Option<Uuid>,
    #[arg(long, help = "Explicit order number; generated when omitted")]
    number: Option<String>,
}

#[derive(Args)]
struct FromOrderArgs {
    #[arg(value_parser = clap::value_parser!(Uuid), help = "Sales order identifier")]
    order: Uuid,
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    warehouse: Option<Uuid>,
}

#[derive(Args)]
struct CompleteMoArgs {
    #[arg(value_parser = clap::value_parser!(Uuid))]
    id: Uuid,
    #[arg(long, help = "Units actually produced")]
    produced: i32,
    #[arg(long, help = "Quality rating, e.g. good")]
    rating: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
enum StepCommands {
    Start(StepIdArgs),
    Complete(CompleteStepArgs),
    Skip(StepIdArgs),
}

#[derive(Args)]
struct StepIdArgs {
    #[arg(value_parser = clap::value_parser!(Uuid), help = "Manufacturing step identifier")]
    id: Uuid,
}

#[derive(Args)]
struct CompleteStepArgs {
    #[arg(value_parser = clap::value_parser!(Uuid))]
    id: Uuid,
    #[arg(long, help = "Quality check outcome (true/false)")]
    passed: Option<bool>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
enum SerialCommands {
    /// Issue serial numbers for a manufacturing order's product
    Issue(IssueSerialsArgs),
    /// Mark a unit defective
    Defective(SerialArgs),
}

#[derive(Args)]
struct IssueSerialsArgs {
    #[arg(value_parser = clap::value_parser!(Uuid), help = "Manufacturing order identifier")]
    order: Uuid,
    quantity: i32,
}

#[derive(Args)]
struct SerialArgs {
    serial: String,
}

#[derive(Subcommand)]
enum InventoryCommands {
    Adjust(AdjustArgs),
    /// Assemble recipe output from its components
    Assemble(RecipeRunArgs),
    /// Break recipe output back into its components
    Disassemble(RecipeRunArgs),
}

#[derive(Args)]
struct AdjustArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    product: Uuid,
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    warehouse: Uuid,
    #[arg(long, allow_negative_numbers = true, help = "Signed quantity change")]
    delta: i32,
    #[arg(long, action = ArgAction::SetTrue, help = "Permit the quantity to drop below zero")]
    allow_negative: bool,
}

#[derive(Args)]
struct RecipeRunArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    recipe: Uuid,
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    warehouse: Uuid,
    #[arg(long, default_value_t = 1)]
    runs: i32,
}

#[derive(Args)]
struct ShipArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    order: Uuid,
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Order item to ship from")]
    item: Uuid,
    #[arg(long)]
    quantity: i32,
    #[arg(long = "serial", help = "Serial number to attach; repeat per unit")]
    serials: Vec<String>,
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    warehouse: Option<Uuid>,
    #[arg(long)]
    carrier: Option<String>,
    #[arg(long)]
    tracking: Option<String>,
    #[arg(long, action = ArgAction::SetTrue, help = "Mark the shipment shipped immediately")]
    ship_now: bool,
}

async fn run_migrate(config: &AppConfig) -> Result<()> {
    let pool = db::establish_connection_from_app_config(config)
        .await
        .context("failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .context("failed to apply migrations")?;
    println!("Migrations applied");
    Ok(())
}

async fn handle_mo_command(state: &AppState, command: MoCommands, json: bool) -> Result<()> {
    let service = &state.services.manufacturing;

    match command {
        MoCommands::Create(args) => {
            let order = service
                .create_manufacturing_order(CreateManufacturingOrder {
                    order_number: args.number,
                    product_id: args.product,
                    recipe_id: args.recipe,
                    warehouse_id: args.warehouse,
                    planned_quantity: args.quantity,
                    ..Default::default()
                })
                .await
                .context("failed to create manufacturing order")?;
            render(json, &order, || {
                format!("Created {} ({}) for {} units", order.order_number, order.id, order.planned_quantity)
            })
        }
        MoCommands::FromOrder(args) => {
            let orders = service
                .create_for_sales_order(args.order, args.warehouse)
                .await
                .context("failed to derive manufacturing orders")?;
            render(json, &orders, || {
                orders
                    .iter()
                    .map(|o| format!("- {} ({}) • {} units", o.order_number, o.id, o.planned_quantity))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        MoCommands::Start(args) => {
            let order = service.start(args.id).await.context("failed to start")?;
            render(json, &order, || format!("{} is {}", order.order_number, order.status))
        }
        MoCommands::Pause(args) => {
            let order = service.pause(args.id).await.context("failed to pause")?;
            render(json, &order, || format!("{} is {}", order.order_number, order.status))
        }
        MoCommands::Cancel(args) => {
            let order = service.cancel(args.id).await.context("failed to cancel")?;
            render(json, &order, || format!("{} is {}", order.order_number, order.status))
        }
        MoCommands::Complete(args) => {
            let completion = service
                .complete(args.id, args.produced, args.rating, args.notes)
                .await
                .context("failed to complete manufacturing order")?;
            render(json, &completion, || {
                let mut lines = vec![format!(
                    "{} completed with {} units",
                    completion.order.order_number, args.produced
                )];
                if let Some(excess) = completion.over_production {
                    lines.push(format!("warning: {} units over plan", excess));
                }
                lines.extend(completion.serial_numbers.iter().map(|s| format!("  {}", s)));
                lines.join("\n")
            })
        }
        MoCommands::Task(args) => {
            let task = service
                .production_task(args.id)
                .await
                .context("failed to load production task")?;
            render(json, &task, || {
                format!(
                    "{} • {} • {}% ({} of {} steps done) • current: {}",
                    task.order_number,
                    task.status,
                    task.progress_percent,
                    task.completed_steps + task.skipped_steps,
                    task.total_steps,
                    task.current_step.as_deref().unwrap_or("-")
                )
            })
        }
    }
}

async fn handle_step_command(state: &AppState, command: StepCommands, json: bool) -> Result<()> {
    let service = &state.services.steps;

    let step = match command {
        StepCommands::Start(args) => service.start_step(args.id).await,
        StepCommands::Skip(args) => service.skip_step(args.id).await,
        StepCommands::Complete(args) => {
            service
                .complete_step(
                    args.id,
                    StepCompletion {
                        quality_check_passed: args.passed,
                        notes: args.notes,
                    },
                )
                .await
        }
    }
    .context("step operation failed")?;

    render(json, &step, || {
        format!("Step {} ({}) is {}", step.step_number, step.operation_name, step.status)
    })
}

async fn handle_serials_command(
    state: &AppState,
    command: SerialCommands,
    json: bool,
) -> Result<()> {
    let service = &state.services.serial_numbers;

    match command {
        SerialCommands::Issue(args) => {
            let serials = service
                .issue(args.order, args.quantity)
                .await
                .context("failed to issue serial numbers")?;
            render(json, &serials, || serials.join("\n"))
        }
        SerialCommands::Defective(args) => {
            let serial = service
                .mark_defective(&args.serial)
                .await
                .context("failed to mark serial number defective")?;
            render(json, &serial, || format!("{} is {}", serial.serial_number, serial.status))
        }
    }
}

async fn handle_inventory_command(
    state: &AppState,
    command: InventoryCommands,
    json: bool,
) -> Result<()> {
    let ledger = &state.services.inventory;

    match command {
        InventoryCommands::Adjust(args) => {
            let quantity = ledger
                .adjust_inventory(args.product, args.warehouse, args.delta, args.allow_negative)
                .await
                .context("failed to adjust inventory")?;
            render(json, &quantity, || format!("On hand: {}", quantity))
        }
        InventoryCommands::Assemble(args) => {
            let outcome = ledger
                .assemble_from_recipe(args.recipe, args.warehouse, args.runs)
                .await
                .context("assembly failed")?;
            render(json, &outcome, || format!("On hand: {}", outcome.product_on_hand))
        }
        InventoryCommands::Disassemble(args) => {
            let outcome = ledger
                .disassemble_from_recipe(args.recipe, args.warehouse, args.runs)
                .await
                .context("disassembly failed")?;
            render(json, &outcome, || format!("On hand: {}", outcome.product_on_hand))
        }
    }
}

async fn handle_ship(state: &AppState, args: ShipArgs, json: bool) -> Result<()> {
    let mut allocation = LineAllocation::new(args.item, args.quantity);
    if !args.serials.is_empty() {
        allocation = allocation.with_serial_numbers(args.serials);
    }

    let result = state
        .services
        .shipments
        .create_partial_shipment(
            args.order,
            vec![allocation],
            ShipmentMeta {
                warehouse_id: args.warehouse,
                carrier: args.carrier,
                tracking_number: args.tracking,
                notes: None,
                ship_immediately: args.ship_now,
            },
        )
        .await
        .context("failed to create shipment")?;

    render(json, &result, || {
        format!(
            "Shipment {} • {} units • order is {}",
            result.shipment.shipment_number,
            result.total_quantity(),
            result.order_status
        )
    })
}

fn render<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}
