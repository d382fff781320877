use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Fetched,
    states: [Fetched, Extracted, Summarized, Chunked, Embedded, DocumentCreated, ChunksStored, Purged, Finalized, Failed],
    events {
        extract { transition: { from: Fetched, to: Extracted } }
        summarize { transition: { from: Extracted, to: Summarized } }
        chunk { transition: { from: Summarized, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        create_document { transition: { from: Embedded, to: DocumentCreated } }
        store_chunks { transition: { from: DocumentCreated, to: ChunksStored } }
        purge { transition: { from: ChunksStored, to: Purged } }
        finalize { transition: { from: Purged, to: Finalized } }
        abort {
            transition: { from: Fetched, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Summarized, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: DocumentCreated, to: Failed }
            transition: { from: ChunksStored, to: Failed }
            transition: { from: Purged, to: Failed }
        }
    }
}

/// Admission (concurrency slot acquisition) happens before the machine
/// exists; a job becomes a machine only once its source bytes are fetched.
pub fn fetched() -> IngestionMachine<(), Fetched> {
    IngestionMachine::new(())
}
