use rill::combine::{race, timeout, Job};
use rill::{time, Runtime};

fn main() -> Result<(), rill::Error> {
    let rt = Runtime::new();
    let _guard = rt.enter();

    let winner = race([
        Job::future(async {
            time::delay(0.05).await?;
            Ok("slow".to_string())
        }),
        Job::future(async { Ok("fast".to_string()) }),
    ])?;
    println!("race winner: {winner}");

    let out: Result<(), rill::Error> = timeout(
        async {
            time::delay(10.0).await?;
            Ok(())
        },
        0.1,
    );
    println!("timeout outcome: {out:?}");

    Ok(())
}
