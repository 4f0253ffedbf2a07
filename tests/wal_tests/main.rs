//! WAL test suite: segment files, the merged reader and the Tiny WAL
