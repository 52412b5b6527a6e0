use std::time::Instant;

use rill::{spawn, time, Runtime};

fn main() -> Result<(), rill::Error> {
    let rt = Runtime::new();
    let started = Instant::now();

    rt.block_on(async {
        println!("queueing timer tasks...");

        let tasks = [3.0, 2.0, 1.0].map(|seconds| {
            spawn(async move {
                time::delay(seconds).await?;
                println!("task with {seconds}s delay completed");
                Ok(())
            })
        });

        for task in tasks {
            task?.join().await?;
        }

        Ok(())
    })?;

    println!("total time elapsed: {:?}", started.elapsed());
    Ok(())
}
