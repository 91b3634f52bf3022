use hostd::runtime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    runtime::boot::init_logging();

    let (state, config) = runtime::boot::boot().await?;
    runtime::serve::serve(state, config).await?;

    Ok(())
}
