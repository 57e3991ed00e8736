//! Handler tables generated with `#[derive(Handlers)]`

use hark_engine::{CommandSpec, Engine, Handlers, Invocation, InvocationContext, Reply};

mod fun {
    use hark_engine::Invocation;

    pub async fn ping(_inv: Invocation) -> anyhow::Result<&'static str> {
        Ok("pong")
    }

    pub async fn roll(inv: Invocation) -> anyhow::Result<String> {
        let sides = inv.args().first().map(|v| v.to_text()).unwrap_or_default();
        Ok(format!("rolling d{}", sides))
    }
}

async fn shout(inv: Invocation) -> anyhow::Result<String> {
    Ok(inv.arg().to_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Handlers)]
enum Commands {
    #[hark(handler = fun::ping)]
    Ping,

    #[hark(id = "dice.roll", handler = fun::roll)]
    DiceRoll,

    #[hark(handler = shout)]
    LoudEcho,
}

#[test]
fn test_ids_and_variants() {
    assert_eq!(Commands::ALL.len(), 3);
    assert_eq!(Commands::Ping.id(), "ping");
    assert_eq!(Commands::DiceRoll.id(), "dice.roll");
    assert_eq!(Commands::LoudEcho.id(), "loud_echo");
}

#[test]
fn test_table_keys() {
    let table = Commands::handler_table();
    assert_eq!(table.keys(), vec!["dice.roll", "loud_echo", "ping"]);
}

#[tokio::test]
async fn test_generated_table_drives_engine() {
    let engine = Engine::builder()
        .command(CommandSpec::new("ping", "Ping"))
        .command(
            CommandSpec::new("dice", "Dice")
                .subcommand(CommandSpec::new("roll", "Roll a die").param("<sides:number>")),
        )
        .command(CommandSpec::new("shout", "Shout").param("<text...>").handler("loud_echo"))
        .handlers(Commands::handler_table())
        .build()
        .unwrap();

    let ctx = InvocationContext::direct("u1", "dm");
    assert_eq!(engine.handle("!ping", &ctx).await.reply(), Reply::text("pong"));
    assert_eq!(
        engine.handle("!dice.roll 20", &ctx).await.reply(),
        Reply::text("rolling d20")
    );
    assert_eq!(
        engine.handle("!shout hey you", &ctx).await.reply(),
        Reply::text("HEY YOU")
    );
    assert_eq!(
        engine.handle("!dice.help", &ctx).await.reply(),
        Reply::text("dice.roll")
    );
}
