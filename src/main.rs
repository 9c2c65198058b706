mod app;
mod cli;

fn main() {
    let cli = cli::parse();
    vidbatch::engine::init_tracing(cli.verbose);
    app::run(cli);
}
