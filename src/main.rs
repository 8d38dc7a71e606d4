fn main() -> anyhow::Result<()> {
    scopeslot::boot::init_common();
    let matches = scopeslot::cli::parse_args();
    scopeslot::boot::start(&matches)
}
