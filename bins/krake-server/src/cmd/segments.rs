use crate::config::SegmentsArgs;
use crate::error::ServerError;

pub fn run(args: SegmentsArgs) -> Result<(), ServerError> {
    let ids = krake_storage_file::discover(&args.dir)?;
    tracing::info!(dir = %args.dir.display(), count = ids.len(), "segment files");
    for id in ids {
        println!("{}\t{}\t{}", id.topic, id.partition, id.base_offset);
    }
    Ok(())
}
