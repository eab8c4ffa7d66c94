use std::io;

/// Resolves on the first interrupt (ctrl-c) or, on unix, terminate signal.
#[cfg(unix)]
pub async fn terminated() -> Result<(), io::Error> {
    use futures::future::{select, Either};
    use std::pin::pin;
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    match select(pin!(tokio::signal::ctrl_c()), pin!(terminate.recv())).await {
        Either::Left((interrupted, _)) => {
            interrupted?;
            log::info!("Received interrupt");
        }
        Either::Right((_, _)) => log::info!("Received terminate"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn terminated() -> Result<(), io::Error> {
    tokio::signal::ctrl_c().await?;
    log::info!("Received interrupt");
    Ok(())
}
