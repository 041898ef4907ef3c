//! Option bit vectors carried by wire messages.

bitflags! {
    /// Represents the bit vector of options for an OP_REPLY message.
    pub struct OpReplyFlags: i32 {
        const CURSOR_NOT_FOUND = 0b0001;
        const QUERY_FAILURE    = 0b0010;
        const AWAIT_CAPABLE    = 0b1000;
    }
}

bitflags! {
    /// Represents the bit vector of options for an OP_UPDATE message.
    pub struct OpUpdateFlags: i32 {
        const UPSERT = 0b01;
        const MULTI  = 0b10;
    }
}

bitflags! {
    /// Represents the bit vector of options for an OP_INSERT message.
    pub struct OpInsertFlags: i32 {
        const CONTINUE_ON_ERROR = 0b1;
    }
}

bitflags! {
    /// Represents the bit vector of options for an OP_QUERY message.
    pub struct OpQueryFlags: i32 {
        const TAILABLE_CURSOR   = 0b00000010;
        const SLAVE_OK          = 0b00000100;
        const NO_CURSOR_TIMEOUT = 0b00010000;
        const AWAIT_DATA        = 0b00100000;
        const EXHAUST           = 0b01000000;
        const PARTIAL           = 0b10000000;
    }
}

impl OpReplyFlags {
    /// Constructs a new struct with all flags set to false.
    pub fn no_flags() -> OpReplyFlags {
        OpReplyFlags::empty()
    }
}

impl OpUpdateFlags {
    /// Constructs a new struct with all flags set to false.
    pub fn no_flags() -> OpUpdateFlags {
        OpUpdateFlags::empty()
    }
}

impl OpInsertFlags {
    /// Constructs a new struct with all flags set to false.
    pub fn no_flags() -> OpInsertFlags {
        OpInsertFlags::empty()
    }
}

impl OpQueryFlags {
    /// Constructs a new struct with all flags set to false.
    pub fn no_flags() -> OpQueryFlags {
        OpQueryFlags::empty()
    }
}
