/*!
Subcommand modules for the `cmdvault` binary.

  src/cmd/
    mod.rs      (this file)
    subject.rs  Subject enum for `list`
    list.rs     ListArgs  + execute_list
    get.rs      GetArgs   + execute_get
    exec.rs     ExecArgs  + execute_exec (async; owns its registry)
    manage.rs   add / remove / group / category / param
    console.rs  terminal sink used by `exec`
    shared.rs   registry opening, param parsing, JSON / error output
    format.rs   colors, boxes, tables

Conventions:
  - Each subcommand exposes one public `execute_*` returning `anyhow::Result<()>`.
  - Argument structs derive `clap::Args` and every command that prints data
    accepts `--json`.
*/

pub mod console;
pub mod exec;
pub mod format;
pub mod get;
pub mod list;
pub mod manage;
pub mod shared;
pub mod subject;

pub use exec::{ExecArgs, execute_exec};
pub use get::{GetArgs, execute_get};
pub use list::{ListArgs, execute_list};
pub use manage::{
    AddArgs, CategoryArgs, GroupArgs, ParamArgs, RemoveArgs, execute_add, execute_category,
    execute_group, execute_param, execute_remove,
};
