//! MemTable test suite: batch application, replay and crash recovery

mod table_tests;
