mod cmd_cat;
mod cmd_info;
mod cmd_serve;
mod managed;

use anyhow::Result;
use cmd_cat::CatCmd;
use cmd_info::InfoCmd;
use cmd_serve::ServeCmd;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Opt {
  #[structopt(subcommand)]
  subcommand: Subcmd,
}

#[derive(Debug, StructOpt)]
enum Subcmd {
  Info(InfoCmd),
  Cat(CatCmd),
  Serve(ServeCmd),
}

fn main() -> Result<()> {
  if std::env::var("RUST_LOG").is_err() {
    std::env::set_var("RUST_LOG", "info");
  }
  pretty_env_logger::init_timed();
  let opt = Opt::from_args();
  match &opt.subcommand {
    Subcmd::Info(cmd) => {
      cmd.run()?;
    }
    Subcmd::Cat(cmd) => {
      cmd.run()?;
    }
    Subcmd::Serve(cmd) => {
      cmd.run()?;
    }
  }
  Ok(())
}
